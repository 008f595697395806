//! The coordinator: membership, routing, and client fan-out.
//!
//! The coordinator fronts the cluster. It owns the hash ring, admits nodes
//! from their join announcements, rebroadcasts neighbor topologies after
//! every membership change, and routes client list traffic to the replica
//! owners. It holds no list state of its own; replicas silently skipped
//! during a fan-out are caught up by anti-entropy.

use crate::config::NodeConfig;
use crate::error::NodeError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tally_ring::{HashRing, RingService};
use tally_sync::{wire, SyncTransport};
use tracing::{debug, info, warn};

pub struct Coordinator<T> {
    ring: RingService,
    transport: Arc<T>,
    members: RwLock<HashMap<String, String>>,
}

impl<T: SyncTransport> Coordinator<T> {
    pub fn new(config: &NodeConfig, transport: Arc<T>) -> Self {
        Self {
            ring: RingService::new(HashRing::new(
                config.virtual_nodes,
                config.replication_factor,
            )),
            transport,
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn ring(&self) -> &RingService {
        &self.ring
    }

    /// Node ids currently admitted, with their server addresses.
    pub fn members(&self) -> HashMap<String, String> {
        self.members.read().clone()
    }

    /// Admit a node from its plaintext join announcement.
    ///
    /// Places the node on the ring, rebroadcasts every member's neighbor
    /// topology, and signals the joiner to pull its share of keys.
    pub async fn handle_join(&self, message: &str) -> Result<(), NodeError> {
        let join = wire::parse_join(message)?;
        self.ring.add_node(&join.node_id, &join.server)?;
        self.members
            .write()
            .insert(join.node_id.clone(), join.server.clone());
        info!(node = %join.node_id, server = %join.server, "node joined the ring");

        self.broadcast_topologies().await;
        if let Err(error) = self.transport.request_keys(&join.server).await {
            warn!(node = %join.node_id, %error, "joiner unreachable for key pull, periodic sync will cover it");
        }
        Ok(())
    }

    /// Withdraw a node and rebroadcast the shrunken topology. The ranges
    /// the node held migrate to the remaining members through their
    /// ordinary anti-entropy rounds.
    pub async fn handle_leave(&self, node_id: &str) -> Result<(), NodeError> {
        self.ring.remove_node(node_id)?;
        self.members.write().remove(node_id);
        info!(node = %node_id, "node left the ring");
        self.broadcast_topologies().await;
        Ok(())
    }

    async fn broadcast_topologies(&self) {
        for topology in self.ring.topologies() {
            let server = topology.node.server.clone();
            if let Err(error) = self.transport.push_topology(&server, &topology).await {
                warn!(%server, %error, "topology broadcast failed");
            }
        }
    }

    /// Forward an uploaded list to every replica owner for its key.
    ///
    /// The write succeeds once the primary owner accepts it; unreachable
    /// replicas are skipped and converge later.
    pub async fn put_list(&self, key: &str, blob: &[u8]) -> Result<(), NodeError> {
        let servers = self.ring.node_and_replicas(key)?;
        let mut delivered = 0;
        for (index, server) in servers.iter().enumerate() {
            match self.transport.push_list(server, key, blob).await {
                Ok(()) => delivered += 1,
                Err(error) if index == 0 => return Err(error.into()),
                Err(error) => {
                    warn!(%server, %error, "replica skipped on upload, anti-entropy will catch it up");
                }
            }
        }
        debug!(%key, delivered, replicas = servers.len(), "list fanned out");
        Ok(())
    }

    /// Fetch a list, trying each replica owner in ring order until one
    /// produces it.
    pub async fn get_list(&self, key: &str) -> Result<Vec<u8>, NodeError> {
        let servers = self.ring.node_and_replicas(key)?;
        for server in &servers {
            match self.transport.fetch_list(server, key).await {
                Ok(Some(blob)) => return Ok(blob),
                Ok(None) => continue,
                Err(error) => {
                    debug!(%server, %error, "replica unavailable on fetch, trying next");
                }
            }
        }
        Err(NodeError::ListUnavailable(key.to_string()))
    }
}
