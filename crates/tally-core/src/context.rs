//! Causal context: per-replica tracking of observed events.
//!
//! Every mutation in the system is identified by a `Dot`, a `(replica id,
//! sequence number)` pair minted by exactly one replica. A `CausalContext`
//! records which dots a replica has observed, split into a compacted
//! contiguous prefix per replica and a pending set of dots that arrived
//! out of order and cannot be folded into the prefix yet.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Replica identifier.
pub type ReplicaId = String;

/// A causally unique event identifier: minted by one replica, never reused.
///
/// `counter` starts at 1; counter 0 means "nothing observed" and is never
/// minted as a dot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub replica_id: ReplicaId,
    pub counter: u64,
}

impl Dot {
    pub fn new(replica_id: impl Into<ReplicaId>, counter: u64) -> Self {
        Self {
            replica_id: replica_id.into(),
            counter,
        }
    }
}

/// Tracks which dots this replica has observed.
///
/// Invariants:
/// - a dot `(r, c)` is known iff `c <= compacted[r]` or the dot is pending
/// - `compacted[r]` only ever increases
/// - `pending` never holds a dot already implied by `compacted`
///   (compaction discards those)
///
/// Every operation is a total function over the context state; there are no
/// error conditions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalContext {
    /// Highest contiguous counter observed per replica.
    pub(crate) compacted: BTreeMap<ReplicaId, u64>,
    /// Dots observed out of order, awaiting compaction.
    pub(crate) pending: BTreeSet<Dot>,
}

impl CausalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next dot this replica would mint. Does not mutate the context.
    pub fn next(&self, replica_id: &str) -> Dot {
        Dot::new(replica_id, self.current(replica_id) + 1)
    }

    /// Mint the next dot for `replica_id`, advancing the compacted prefix.
    ///
    /// Only valid when the caller guarantees no gap is created, i.e. the
    /// minted dot immediately follows the compacted prefix.
    pub fn make_dot(&mut self, replica_id: &str) -> Dot {
        let dot = self.next(replica_id);
        self.compacted
            .insert(dot.replica_id.clone(), dot.counter);
        dot
    }

    /// Record an externally observed dot as pending.
    pub fn insert_dot(&mut self, replica_id: &str, counter: u64, compact_now: bool) {
        self.pending.insert(Dot::new(replica_id, counter));
        if compact_now {
            self.compact();
        }
    }

    /// Highest contiguous counter observed for `replica_id`, 0 if none.
    pub fn current(&self, replica_id: &str) -> u64 {
        self.compacted.get(replica_id).copied().unwrap_or(0)
    }

    /// Whether `dot` has been observed, either compacted or pending.
    pub fn dot_in(&self, dot: &Dot) -> bool {
        dot.counter <= self.current(&dot.replica_id) || self.pending.contains(dot)
    }

    /// Fold pending dots into the compacted prefix.
    ///
    /// Runs scan passes over `pending` until a full pass changes nothing:
    /// a dot that cannot fold this pass may become foldable after another
    /// dot fills the gap below it, so a single pass is not enough. Worst
    /// case is O(pending²), which is acceptable because the pending set is
    /// bounded by recent unacknowledged operations.
    pub fn compact(&mut self) {
        loop {
            let mut changed = false;
            let scan: Vec<Dot> = self.pending.iter().cloned().collect();
            for dot in scan {
                match self.compacted.get(&dot.replica_id).copied() {
                    None if dot.counter == 1 => {
                        self.compacted.insert(dot.replica_id.clone(), 1);
                        self.pending.remove(&dot);
                        changed = true;
                    }
                    Some(seen) if dot.counter == seen + 1 => {
                        self.compacted.insert(dot.replica_id.clone(), dot.counter);
                        self.pending.remove(&dot);
                        changed = true;
                    }
                    Some(seen) if dot.counter <= seen => {
                        // Already implied by the prefix; discard without folding.
                        self.pending.remove(&dot);
                    }
                    _ => {}
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Merge another context into this one: pointwise max of the compacted
    /// prefixes over the union of replica ids, then compact.
    ///
    /// Pending sets are not merged across contexts; a pending dot only ever
    /// matters to the replica that recorded it.
    pub fn join(&mut self, other: &CausalContext) {
        for (replica_id, &theirs) in &other.compacted {
            let entry = self.compacted.entry(replica_id.clone()).or_insert(0);
            *entry = (*entry).max(theirs);
        }
        self.compact();
    }
}
