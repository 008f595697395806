//! Consistent-hashing ring with virtual nodes and replica placement.
//!
//! Every real node owns a fixed number of virtual entries spread around the
//! hash space so load distributes evenly. A key belongs to the first entry
//! whose hash is at or past the key's hash, wrapping at the top of the
//! space. Replica placement and neighbor computation walk the ring while
//! crediting each virtual entry to its real node, so replicas always land
//! on distinct physical nodes.

use crate::hash::KeyHash;
use crate::topology::{NeighborTopology, TopologyEntry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by ring lookups and membership changes.
///
/// These are topology errors in the §7 sense: reported to the caller as a
/// routing failure immediately, never retried inside the ring.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring is empty")]
    Empty,

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node already joined: {0}")]
    DuplicateNode(String),
}

/// One entry on the ring: a real node or one of its virtual stand-ins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingNode {
    pub id: String,
    pub hash: KeyHash,
    pub server: String,
    pub is_virtual: bool,
    /// The owning real node's id for virtual entries, `None` for real ones.
    pub real_id: Option<String>,
}

impl RingNode {
    /// The physical node this entry is credited to.
    pub fn real_identity(&self) -> &str {
        self.real_id.as_deref().unwrap_or(&self.id)
    }
}

/// Membership set mapping keys to owning nodes.
///
/// The entry list is kept sorted by hash ascending; lookups are a binary
/// search plus a forward walk. Mutation and reads are not synchronized
/// here; [`RingService`] provides the reader/writer discipline.
#[derive(Clone, Debug)]
pub struct HashRing {
    nodes: Vec<RingNode>,
    virtual_nodes: usize,
    replication_factor: usize,
}

impl HashRing {
    pub fn new(virtual_nodes: usize, replication_factor: usize) -> Self {
        Self {
            nodes: Vec::new(),
            virtual_nodes,
            replication_factor,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All entries, sorted by hash.
    pub fn entries(&self) -> &[RingNode] {
        &self.nodes
    }

    /// The real (non-virtual) entries, one per physical node.
    pub fn real_entries(&self) -> impl Iterator<Item = &RingNode> {
        self.nodes.iter().filter(|n| !n.is_virtual)
    }

    /// Number of distinct physical nodes.
    pub fn real_node_count(&self) -> usize {
        self.real_entries().count()
    }

    /// Place a node: one real entry hashed from its id plus
    /// `virtual_nodes` virtual entries hashed from `id + index`.
    pub fn add_node(&mut self, id: &str, server: &str) -> Result<(), RingError> {
        if self.nodes.iter().any(|n| n.real_identity() == id) {
            return Err(RingError::DuplicateNode(id.to_string()));
        }

        self.nodes.push(RingNode {
            id: id.to_string(),
            hash: KeyHash::of(id.as_bytes()),
            server: server.to_string(),
            is_virtual: false,
            real_id: None,
        });
        for index in 0..self.virtual_nodes {
            let virtual_id = format!("{}{}", id, index);
            self.nodes.push(RingNode {
                hash: KeyHash::of(virtual_id.as_bytes()),
                id: virtual_id,
                server: server.to_string(),
                is_virtual: true,
                real_id: Some(id.to_string()),
            });
        }
        self.nodes.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(())
    }

    /// Withdraw a node: drop its real entry and every virtual entry it
    /// owns. The key ranges it held migrate to the successors through the
    /// ordinary anti-entropy cycle.
    pub fn remove_node(&mut self, id: &str) -> Result<(), RingError> {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.real_identity() != id);
        if self.nodes.len() == before {
            return Err(RingError::UnknownNode(id.to_string()));
        }
        Ok(())
    }

    /// Index of the entry owning `hash`: the first entry at or past it,
    /// wrapping to index 0 past the top of the space.
    fn owner_index(&self, hash: &KeyHash) -> usize {
        let idx = self.nodes.partition_point(|n| n.hash < *hash);
        if idx == self.nodes.len() {
            0
        } else {
            idx
        }
    }

    /// Server address of the node owning `key`.
    pub fn get(&self, key: &str) -> Result<String, RingError> {
        if self.nodes.is_empty() {
            return Err(RingError::Empty);
        }
        let idx = self.owner_index(&KeyHash::of(key.as_bytes()));
        Ok(self.nodes[idx].server.clone())
    }

    /// Servers that must hold a replica of `key`: the owner plus up to
    /// `replication_factor` further distinct physical nodes found by
    /// walking forward. Virtual entries are credited to their real node
    /// and an already-selected identity is skipped, so the result never
    /// places two replicas on the same physical node.
    pub fn node_and_replicas(&self, key: &str) -> Result<Vec<String>, RingError> {
        if self.nodes.is_empty() {
            return Err(RingError::Empty);
        }
        let start = self.owner_index(&KeyHash::of(key.as_bytes()));
        let wanted = self.replication_factor + 1;

        let mut selected: Vec<&str> = Vec::new();
        let mut servers = Vec::new();
        for offset in 0..self.nodes.len() {
            let node = &self.nodes[(start + offset) % self.nodes.len()];
            let identity = node.real_identity();
            if selected.contains(&identity) {
                continue;
            }
            selected.push(identity);
            servers.push(node.server.clone());
            if servers.len() == wanted {
                break;
            }
        }
        Ok(servers)
    }

    /// Walk the ring from just past `from`, in `step` direction, collecting
    /// the first entry seen for each distinct real identity other than
    /// `own` until `replication_factor` neighbors are found.
    fn collect_neighbors(&self, from: usize, own: &str, forward: bool) -> Vec<RingNode> {
        let len = self.nodes.len();
        let mut selected: Vec<&str> = Vec::new();
        let mut neighbors = Vec::new();
        for offset in 1..len {
            let idx = if forward {
                (from + offset) % len
            } else {
                (from + len - offset) % len
            };
            let node = &self.nodes[idx];
            let identity = node.real_identity();
            if identity == own || selected.contains(&identity) {
                continue;
            }
            selected.push(identity);
            neighbors.push(node.clone());
            if neighbors.len() == self.replication_factor {
                break;
            }
        }
        neighbors
    }

    fn real_entry_index(&self, id: &str) -> Result<usize, RingError> {
        self.nodes
            .iter()
            .position(|n| !n.is_virtual && n.id == id)
            .ok_or_else(|| RingError::UnknownNode(id.to_string()))
    }

    /// Ring-successors of `id`: the next `replication_factor` distinct real
    /// nodes walking forward from its real entry. These are the peers whose
    /// replica responsibility overlaps this node's, and therefore the peers
    /// it exchanges key ranges with.
    pub fn front_neighbors(&self, id: &str) -> Result<Vec<RingNode>, RingError> {
        let idx = self.real_entry_index(id)?;
        Ok(self.collect_neighbors(idx, id, true))
    }

    /// Ring-predecessors of `id`, walking backward from its real entry.
    pub fn back_neighbors(&self, id: &str) -> Result<Vec<RingNode>, RingError> {
        let idx = self.real_entry_index(id)?;
        Ok(self.collect_neighbors(idx, id, false))
    }

    /// The neighbor topology for one node, as broadcast after membership
    /// changes.
    pub fn topology_for(&self, id: &str) -> Result<NeighborTopology, RingError> {
        let idx = self.real_entry_index(id)?;
        let entry = TopologyEntry::from_ring_node(&self.nodes[idx]);
        let front = self
            .front_neighbors(id)?
            .iter()
            .map(TopologyEntry::from_ring_node)
            .collect();
        let back = self
            .back_neighbors(id)?
            .iter()
            .map(TopologyEntry::from_ring_node)
            .collect();
        Ok(NeighborTopology {
            node: entry,
            front,
            back,
        })
    }

    /// Topologies for every member, one per real node.
    pub fn topologies(&self) -> Vec<NeighborTopology> {
        let ids: Vec<String> = self.real_entries().map(|n| n.id.clone()).collect();
        ids.iter()
            .filter_map(|id| self.topology_for(id).ok())
            .collect()
    }
}

/// Shared handle on the ring with the reader/writer discipline routing
/// requires: concurrent routing reads, exclusive membership writes.
///
/// Handlers receive this as an explicit collaborator; ring state never
/// lives in a global.
pub struct RingService {
    inner: RwLock<HashRing>,
}

impl RingService {
    pub fn new(ring: HashRing) -> Self {
        Self {
            inner: RwLock::new(ring),
        }
    }

    pub fn add_node(&self, id: &str, server: &str) -> Result<(), RingError> {
        self.inner.write().add_node(id, server)
    }

    pub fn remove_node(&self, id: &str) -> Result<(), RingError> {
        self.inner.write().remove_node(id)
    }

    pub fn get(&self, key: &str) -> Result<String, RingError> {
        self.inner.read().get(key)
    }

    pub fn node_and_replicas(&self, key: &str) -> Result<Vec<String>, RingError> {
        self.inner.read().node_and_replicas(key)
    }

    pub fn topology_for(&self, id: &str) -> Result<NeighborTopology, RingError> {
        self.inner.read().topology_for(id)
    }

    pub fn topologies(&self) -> Vec<NeighborTopology> {
        self.inner.read().topologies()
    }

    pub fn real_node_count(&self) -> usize {
        self.inner.read().real_node_count()
    }
}
