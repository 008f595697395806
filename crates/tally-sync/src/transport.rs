//! Transport collaborator connecting nodes.
//!
//! The cluster's real transport is external I/O glue; the engine and
//! coordinator only depend on the `SyncTransport` trait. `MemoryMesh`
//! implements it for tests and simulation, pushing every message through
//! the wire codecs so the in-memory cluster exchanges exactly the frames a
//! networked one would, and can mark nodes unreachable to simulate
//! outages and partitions.

use crate::store::StoreError;
use crate::wire::{self, SyncRequest, SyncResponse, WireError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tally_ring::NeighborTopology;
use thiserror::Error;

/// Errors raised while talking to a peer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer {server} rejected request: {reason}")]
    Rejected { server: String, reason: String },

    #[error("wire codec failure: {0}")]
    Codec(#[from] WireError),
}

/// Outbound operations a node or coordinator performs against a peer.
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
    /// Run one anti-entropy exchange against a peer.
    async fn sync(
        &self,
        server: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, TransportError>;

    /// Hand a serialized list to a replica owner.
    async fn push_list(&self, server: &str, key: &str, blob: &[u8])
        -> Result<(), TransportError>;

    /// Fetch a serialized list from a replica owner.
    async fn fetch_list(&self, server: &str, key: &str)
        -> Result<Option<Vec<u8>>, TransportError>;

    /// Deliver a neighbor-topology broadcast to a node.
    async fn push_topology(
        &self,
        server: &str,
        topology: &NeighborTopology,
    ) -> Result<(), TransportError>;

    /// Signal a freshly joined node to pull its share of keys now rather
    /// than waiting for its first periodic round.
    async fn request_keys(&self, server: &str) -> Result<(), TransportError>;
}

/// Inbound half: what a node exposes to the transport.
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    async fn handle_sync(&self, request: SyncRequest) -> Result<SyncResponse, StoreError>;

    async fn handle_put_list(&self, key: &str, blob: &[u8]) -> Result<(), StoreError>;

    async fn handle_get_list(&self, key: &str) -> Option<Vec<u8>>;

    async fn handle_topology(&self, topology: NeighborTopology);

    async fn handle_request_keys(&self);
}

/// In-memory cluster transport.
///
/// Registered handlers stand in for listening nodes. Sync and topology
/// frames are encoded and re-parsed on the way through, so codec and
/// protocol failures surface in-process the same way they would over a
/// socket.
#[derive(Default)]
pub struct MemoryMesh {
    handlers: RwLock<HashMap<String, Arc<dyn SyncHandler>>>,
    severed: RwLock<HashSet<String>>,
}

impl MemoryMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node's handler under its server address.
    pub fn register(&self, server: &str, handler: Arc<dyn SyncHandler>) {
        self.handlers.write().insert(server.to_string(), handler);
    }

    /// Make a node unreachable, as a crash or partition would.
    pub fn sever(&self, server: &str) {
        self.severed.write().insert(server.to_string());
    }

    /// Make a severed node reachable again.
    pub fn heal(&self, server: &str) {
        self.severed.write().remove(server);
    }

    fn reach(&self, server: &str) -> Result<Arc<dyn SyncHandler>, TransportError> {
        if self.severed.read().contains(server) {
            return Err(TransportError::Unreachable(server.to_string()));
        }
        self.handlers
            .read()
            .get(server)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(server.to_string()))
    }

    fn rejected(server: &str, error: StoreError) -> TransportError {
        TransportError::Rejected {
            server: server.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl SyncTransport for MemoryMesh {
    async fn sync(
        &self,
        server: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, TransportError> {
        let handler = self.reach(server)?;

        // Round-trip through the wire format, exactly as a socket would.
        let frame = wire::encode_sync_request(&request)?;
        let request = wire::parse_sync_request(&frame)?;
        let response = handler
            .handle_sync(request)
            .await
            .map_err(|e| Self::rejected(server, e))?;
        let frame = wire::encode_sync_response(&response)?;
        Ok(wire::parse_sync_response(&frame)?)
    }

    async fn push_list(
        &self,
        server: &str,
        key: &str,
        blob: &[u8],
    ) -> Result<(), TransportError> {
        let handler = self.reach(server)?;
        handler
            .handle_put_list(key, blob)
            .await
            .map_err(|e| Self::rejected(server, e))
    }

    async fn fetch_list(
        &self,
        server: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let handler = self.reach(server)?;
        Ok(handler.handle_get_list(key).await)
    }

    async fn push_topology(
        &self,
        server: &str,
        topology: &NeighborTopology,
    ) -> Result<(), TransportError> {
        let handler = self.reach(server)?;
        let frame = wire::encode_topology(topology);
        let topology = wire::parse_topology(&frame)?;
        handler.handle_topology(topology).await;
        Ok(())
    }

    async fn request_keys(&self, server: &str) -> Result<(), TransportError> {
        let handler = self.reach(server)?;
        handler.handle_request_keys().await;
        Ok(())
    }
}
