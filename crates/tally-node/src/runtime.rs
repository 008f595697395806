//! The per-node runtime: storage, topology, and the sync task.

use async_trait::async_trait;
use crate::config::NodeConfig;
use std::sync::Arc;
use tally_ring::NeighborTopology;
use tally_sync::{
    ListStore, StoreError, StoredList, SyncEngine, SyncHandler, SyncRequest, SyncResponse,
    SyncTransport,
};
use tokio::task::JoinHandle;
use tracing::info;
use ulid::Ulid;

/// One storage node.
///
/// Owns the node's list storage and anti-entropy engine, and exposes the
/// handlers the transport delivers inbound traffic to: list upload/fetch,
/// topology broadcasts, sync requests, and the pull-your-keys signal a
/// coordinator sends after a join.
pub struct NodeRuntime<S, T> {
    id: String,
    server: String,
    config: NodeConfig,
    engine: Arc<SyncEngine<S, T>>,
}

impl<S: ListStore, T: SyncTransport> NodeRuntime<S, T> {
    pub fn new(
        id: impl Into<String>,
        server: impl Into<String>,
        store: Arc<S>,
        transport: Arc<T>,
        config: NodeConfig,
    ) -> Self {
        let id = id.into();
        let engine = Arc::new(
            SyncEngine::new(id.clone(), store, transport).with_retry(config.retry),
        );
        Self {
            id,
            server: server.into(),
            config,
            engine,
        }
    }

    /// Mint a fresh node or replica id for callers that do not supply one.
    pub fn mint_id() -> String {
        Ulid::new().to_string()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn store(&self) -> &Arc<S> {
        self.engine.store()
    }

    pub fn engine(&self) -> &Arc<SyncEngine<S, T>> {
        &self.engine
    }

    /// The announcement this node sends to a coordinator.
    pub fn join_message(&self) -> tally_sync::JoinMessage {
        tally_sync::JoinMessage {
            node_id: self.id.clone(),
            server: self.server.clone(),
        }
    }

    /// Merge an uploaded list into local storage.
    pub async fn put_list(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.engine
            .store()
            .merge(StoredList::new(key, blob.to_vec()))
            .await
    }

    /// Serve a stored list.
    pub async fn get_list(&self, key: &str) -> Option<Vec<u8>> {
        self.engine.store().get(key).await.map(|entry| entry.blob)
    }

    /// Consume a topology broadcast from the coordinator.
    pub fn apply_topology(&self, topology: NeighborTopology) {
        info!(
            node = %self.id,
            front = topology.front.len(),
            back = topology.back.len(),
            "applying neighbor topology"
        );
        self.engine.set_topology(topology);
    }

    pub fn topology(&self) -> Option<NeighborTopology> {
        self.engine.topology()
    }

    /// Pull this node's share of keys from its neighbors immediately,
    /// instead of waiting for the next periodic round.
    pub async fn request_keys(&self) {
        self.engine.sync_round().await;
    }

    /// Start the periodic anti-entropy task for this node.
    pub fn spawn_sync(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let interval = self.config.sync_interval;
        tokio::spawn(engine.run(interval))
    }
}

#[async_trait]
impl<S: ListStore, T: SyncTransport> SyncHandler for NodeRuntime<S, T> {
    async fn handle_sync(&self, request: SyncRequest) -> Result<SyncResponse, StoreError> {
        self.engine.handle_request(request).await
    }

    async fn handle_put_list(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.put_list(key, blob).await
    }

    async fn handle_get_list(&self, key: &str) -> Option<Vec<u8>> {
        self.get_list(key).await
    }

    async fn handle_topology(&self, topology: NeighborTopology) {
        self.apply_topology(topology);
    }

    async fn handle_request_keys(&self) {
        self.request_keys().await;
    }
}
