//! The user-visible list CRDT: an observed-remove map of PN-Counters.
//!
//! Each item key maps to a `DotStore` of counter fragments. Removal only
//! affects fragments the remover has causally observed, so a removal
//! concurrent with an addition keeps the addition (add wins). The merge is
//! commutative, idempotent, and associative in the observable per-key
//! values, so replicas converge regardless of exchange order.

use crate::context::{CausalContext, ReplicaId};
use crate::counter::{Counter, DotStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const INCREMENT: Counter = Counter {
    positive: 1,
    negative: 0,
};
const DECREMENT: Counter = Counter {
    positive: 0,
    negative: 1,
};

/// A replicated list of item counts owned by one replica.
///
/// The list owns its causal context and all of its dot stores exclusively;
/// stores are never shared between list instances. Mutation and merge of a
/// single list must be externally serialized (one writer at a time); the
/// type itself is not synchronized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedList {
    pub(crate) items: BTreeMap<String, DotStore>,
    pub(crate) ctx: CausalContext,
    pub(crate) replica_id: ReplicaId,
}

impl ReplicatedList {
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            items: BTreeMap::new(),
            ctx: CausalContext::new(),
            replica_id: replica_id.into(),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn context(&self) -> &CausalContext {
        &self.ctx
    }

    /// Raise the count of `key` by one, creating the item if needed.
    pub fn increment(&mut self, key: &str) {
        self.apply(key, INCREMENT);
    }

    /// Lower the count of `key` by one, creating the item if needed.
    pub fn decrement(&mut self, key: &str) {
        self.apply(key, DECREMENT);
    }

    fn apply(&mut self, key: &str, change: Counter) {
        let replica_id = self.replica_id.clone();
        let store = self.items.entry(key.to_string()).or_default();
        store.update(&replica_id, change, &mut self.ctx);
    }

    /// Delete an item outright.
    ///
    /// The deletion is local-only: no tombstone records which dots were
    /// observed. At merge time any removal dominates all dots the remover's
    /// context covers, while causally concurrent additions survive.
    pub fn remove(&mut self, key: &str) {
        self.items.remove(key);
    }

    /// Net count for `key`; 0 when the item is absent.
    pub fn value(&self, key: &str) -> i64 {
        self.items.get(key).map(DotStore::value).unwrap_or(0)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Live items and their net counts.
    pub fn items(&self) -> impl Iterator<Item = (&str, i64)> {
        self.items
            .iter()
            .map(|(key, store)| (key.as_str(), store.value()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge `other`'s state into this list.
    ///
    /// Takes the donor mutably: after the exchange, every donor store is
    /// given a fresh dot under the donor's replica id, advancing the donor's
    /// own context so its next local mutation cannot collide with a dot it
    /// has already handed over.
    pub fn join(&mut self, other: &mut ReplicatedList) {
        let original_items = self.items.clone();

        // Fold in everything the other side holds.
        for (key, remote_store) in &other.items {
            match self.items.get_mut(key) {
                Some(local_store) => {
                    for (dot, counter) in remote_store.iter() {
                        if let Some(existing) = local_store.get(dot).copied() {
                            local_store.insert(dot.clone(), existing.merge_max(counter));
                        } else if dot.counter > self.ctx.current(&dot.replica_id) {
                            // Causally new fragment; anything at or below the
                            // prefix was already observed and removed here.
                            local_store.insert(dot.clone(), *counter);
                        }
                    }
                }
                None => {
                    self.items.insert(key.clone(), remote_store.clone());
                }
            }
        }

        // Keys we hold that the other side does not: drop every fragment the
        // other side has causally observed (it removed them); fragments past
        // its prefix are concurrent additions and stay.
        for (key, store) in &original_items {
            if other.items.contains_key(key) {
                continue;
            }
            for (dot, _) in store.iter() {
                if dot.counter <= other.ctx.current(&dot.replica_id) {
                    if let Some(local_store) = self.items.get_mut(key) {
                        local_store.remove(dot);
                    }
                }
            }
        }
        self.items.retain(|_, store| !store.is_empty());

        self.ctx.join(&other.ctx);

        // Advance the donor past the dots it just contributed.
        let donor_id = other.replica_id.clone();
        for store in other.items.values_mut() {
            store.fresh(&donor_id, &mut other.ctx);
        }
    }
}
