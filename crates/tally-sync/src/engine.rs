//! Anti-entropy engine: periodic range reconciliation with front neighbors.
//!
//! Each round, the node takes the circular hash range from its own ring
//! position around to its first back neighbor, collects its stored entries
//! in that range, and offers them to every front neighbor. The neighbor
//! merges what it received, scans the same bounds, and answers with its
//! own matching entries, which the initiator merges in turn. Every point
//! of the circle lies in some pair's exchanged range, so replicas converge
//! without a coordinator, and ranges displaced by membership changes
//! migrate through the same exchange: a new joiner is handed its share by
//! the neighbors that held it before.
//!
//! Transport failures are retried with bounded exponential backoff.
//! Exhausting the retries abandons the peer for this round only; the next
//! periodic tick tries again. A failed peer never aborts the node.

use crate::store::{ListStore, StoreError};
use crate::transport::{SyncTransport, TransportError};
use crate::wire::{SyncRequest, SyncResponse};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tally_ring::NeighborTopology;
use tracing::{debug, warn};

/// Bounded exponential backoff for peer calls.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }
}

/// What one sync round accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub peers_reached: usize,
    pub peers_failed: usize,
    pub entries_offered: usize,
    pub entries_merged: usize,
}

/// Per-node anti-entropy driver.
///
/// Holds the node's current neighbor topology (replaced whenever the
/// coordinator broadcasts a new one), the storage collaborator, and the
/// transport. One engine runs per node as its own periodic task.
pub struct SyncEngine<S, T> {
    node_id: String,
    store: Arc<S>,
    transport: Arc<T>,
    topology: RwLock<Option<NeighborTopology>>,
    retry: RetryPolicy,
}

impl<S: ListStore, T: SyncTransport> SyncEngine<S, T> {
    pub fn new(node_id: impl Into<String>, store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            transport,
            topology: RwLock::new(None),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Replace the node's view of its ring vicinity.
    pub fn set_topology(&self, topology: NeighborTopology) {
        *self.topology.write() = Some(topology);
    }

    pub fn topology(&self) -> Option<NeighborTopology> {
        self.topology.read().clone()
    }

    /// Run one reconciliation round against every front neighbor.
    ///
    /// A no-op until a topology with at least one back neighbor arrives;
    /// with no back neighbor there is no bounded range to reconcile.
    pub async fn sync_round(&self) -> SyncOutcome {
        let Some(topology) = self.topology() else {
            return SyncOutcome::default();
        };
        let Some((start, end)) = topology.sync_range() else {
            return SyncOutcome::default();
        };

        let entries = self.store.scan_range(&start, &end).await;
        let mut outcome = SyncOutcome {
            entries_offered: entries.len(),
            ..SyncOutcome::default()
        };

        for neighbor in &topology.front {
            let request = SyncRequest {
                start,
                end,
                entries: entries.clone(),
            };
            match self.sync_with(&neighbor.server, request).await {
                Ok(response) => {
                    outcome.peers_reached += 1;
                    for entry in response.entries {
                        let key = entry.key.clone();
                        match self.store.merge(entry).await {
                            Ok(()) => outcome.entries_merged += 1,
                            Err(error) => {
                                warn!(node = %self.node_id, %key, %error, "discarding undecodable sync entry");
                            }
                        }
                    }
                }
                Err(error) => {
                    outcome.peers_failed += 1;
                    warn!(
                        node = %self.node_id,
                        peer = %neighbor.server,
                        %error,
                        "sync failed after retries, deferring to next round"
                    );
                }
            }
        }

        debug!(
            node = %self.node_id,
            reached = outcome.peers_reached,
            failed = outcome.peers_failed,
            offered = outcome.entries_offered,
            merged = outcome.entries_merged,
            "sync round finished"
        );
        outcome
    }

    /// The receiving side of the exchange: merge the offered entries, then
    /// answer with our own entries for the same bounds.
    pub async fn handle_request(&self, request: SyncRequest) -> Result<SyncResponse, StoreError> {
        for entry in request.entries {
            self.store.merge(entry).await?;
        }
        let entries = self.store.scan_range(&request.start, &request.end).await;
        Ok(SyncResponse { entries })
    }

    async fn sync_with(
        &self,
        server: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, TransportError> {
        let mut attempt = 0;
        loop {
            match self.transport.sync(server, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(error);
                    }
                    let delay = self.retry.delay(attempt - 1);
                    debug!(peer = %server, %error, attempt, ?delay, "retrying sync");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Periodic background task driving the rounds. Runs until the task
    /// owning it is dropped.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sync_round().await;
        }
    }
}
