//! Error types for the node runtime and coordinator.

use tally_ring::RingError;
use tally_sync::{StoreError, TransportError, WireError};
use thiserror::Error;

/// Errors surfaced by cluster operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Routing failure: reported immediately, never retried internally.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// Malformed message rejected at the boundary.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Storage rejected a blob.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A peer stayed unreachable through the retry budget.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reachable replica produced the requested list.
    #[error("no replica produced a list for {0}")]
    ListUnavailable(String),
}
