//! Per-key causal counter fragments.
//!
//! A `DotStore` holds every counter fragment contributed to one item key,
//! each fragment keyed by the dot that minted it. Because fragments are
//! uniquely keyed, merging two stores is a pointwise union/max and can
//! never double-count a contribution.

use crate::context::{CausalContext, Dot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One PN-Counter fragment: positive and negative contributions tracked
/// separately so concurrent increments and decrements converge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub positive: u64,
    pub negative: u64,
}

impl Counter {
    pub const ZERO: Counter = Counter {
        positive: 0,
        negative: 0,
    };

    /// Net value of this fragment.
    pub fn net(&self) -> i64 {
        self.positive as i64 - self.negative as i64
    }

    /// Pointwise max of both components. Concurrent writes to the same dot
    /// are not expected, but max is the safe monotone merge if they happen.
    pub fn merge_max(&self, other: &Counter) -> Counter {
        Counter {
            positive: self.positive.max(other.positive),
            negative: self.negative.max(other.negative),
        }
    }
}

/// All causal fragments observed for one item key, keyed by minting dot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotStore {
    pub(crate) slots: BTreeMap<Dot, Counter>,
}

impl DotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a local delta under `replica_id`.
    ///
    /// The store keeps exactly one live mutable dot per replica: if the
    /// causal context has advanced past the dot this store last minted for
    /// `replica_id`, a fresh zeroed dot is minted first, and the prior dot
    /// becomes immutable history for merge purposes.
    pub fn update(&mut self, replica_id: &str, change: Counter, ctx: &mut CausalContext) {
        let live = self
            .slots
            .keys()
            .filter(|dot| dot.replica_id == replica_id)
            .map(|dot| dot.counter)
            .max();
        if live != Some(ctx.current(replica_id)) {
            self.fresh(replica_id, ctx);
        }

        let dot = Dot::new(replica_id, ctx.current(replica_id));
        let slot = self.slots.entry(dot).or_insert(Counter::ZERO);
        slot.positive += change.positive;
        slot.negative += change.negative;
    }

    /// Mint a zeroed fragment at the replica's next dot, advancing `ctx`.
    pub fn fresh(&mut self, replica_id: &str, ctx: &mut CausalContext) {
        let dot = ctx.make_dot(replica_id);
        self.slots.insert(dot, Counter::ZERO);
    }

    /// Net value across all fragments; 0 for an empty store.
    pub fn value(&self) -> i64 {
        self.slots.values().map(Counter::net).sum()
    }

    /// Merge-only primitive: record a fragment under its minting dot.
    pub fn insert(&mut self, dot: Dot, counter: Counter) {
        self.slots.insert(dot, counter);
    }

    /// Merge-only primitive: drop the fragment minted by `dot`.
    pub fn remove(&mut self, dot: &Dot) {
        self.slots.remove(dot);
    }

    pub fn get(&self, dot: &Dot) -> Option<&Counter> {
        self.slots.get(dot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dot, &Counter)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
