//! Neighbor topology: what a node needs to know about its ring vicinity.
//!
//! After every membership change the coordinator recomputes one
//! `NeighborTopology` per member and broadcasts it. A node never inspects
//! the full ring; its front and back neighbors are all it needs to scope
//! anti-entropy exchanges.

use crate::hash::KeyHash;
use crate::ring::RingNode;
use serde::{Deserialize, Serialize};

/// One ring position a node must know about: itself or a neighbor.
/// A server address to talk to and where that entry sits on the ring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    pub server: String,
    pub hash: KeyHash,
}

impl TopologyEntry {
    pub fn new(server: impl Into<String>, hash: KeyHash) -> Self {
        Self {
            server: server.into(),
            hash,
        }
    }

    pub fn from_ring_node(node: &RingNode) -> Self {
        Self {
            server: node.server.clone(),
            hash: node.hash,
        }
    }
}

/// A node's view of its ring vicinity.
///
/// `front` and `back` are ordered nearest-first; `back[0]` is the
/// predecessor bounding the hash range the node is responsible for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborTopology {
    pub node: TopologyEntry,
    pub front: Vec<TopologyEntry>,
    pub back: Vec<TopologyEntry>,
}

impl NeighborTopology {
    /// The circular hash range this node is primarily responsible for,
    /// relative to its first back neighbor: `(back[0].hash, node.hash]`.
    ///
    /// `None` when the node has no back neighbor yet (singleton ring).
    pub fn owned_range(&self) -> Option<(KeyHash, KeyHash)> {
        self.back
            .first()
            .map(|back| (back.hash, self.node.hash))
    }

    /// The circular hash range a node offers to its front neighbors each
    /// anti-entropy round: `(node.hash, back[0].hash]`, the wraparound
    /// complement of [`owned_range`](Self::owned_range).
    ///
    /// Exchanging the complement rather than the owned range keeps every
    /// point of the circle covered by some exchange even when virtual
    /// entries split ownership into ranges not adjacent to any real entry.
    ///
    /// `None` when the node has no back neighbor yet (singleton ring).
    pub fn sync_range(&self) -> Option<(KeyHash, KeyHash)> {
        self.back
            .first()
            .map(|back| (self.node.hash, back.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::HashRing;

    #[test]
    fn test_owned_range_bounded_by_first_back_neighbor() {
        let mut ring = HashRing::new(4, 2);
        ring.add_node("alpha", "10.0.0.1:7000").unwrap();
        ring.add_node("beta", "10.0.0.2:7000").unwrap();
        ring.add_node("gamma", "10.0.0.3:7000").unwrap();

        let topology = ring.topology_for("alpha").unwrap();
        let (start, end) = topology.owned_range().unwrap();
        assert_eq!(start, topology.back[0].hash);
        assert_eq!(end, topology.node.hash);
        // The node's own position is always inside its owned range.
        assert!(topology.node.hash.in_range(&start, &end));
    }

    #[test]
    fn test_sync_range_is_the_complement_of_owned() {
        let mut ring = HashRing::new(4, 2);
        ring.add_node("alpha", "10.0.0.1:7000").unwrap();
        ring.add_node("beta", "10.0.0.2:7000").unwrap();
        ring.add_node("gamma", "10.0.0.3:7000").unwrap();

        let topology = ring.topology_for("beta").unwrap();
        let (owned_start, owned_end) = topology.owned_range().unwrap();
        let (sync_start, sync_end) = topology.sync_range().unwrap();
        assert_eq!((sync_start, sync_end), (owned_end, owned_start));

        // Together the two ranges cover the whole circle.
        for probe in ["alice", "bob", "carol", "dave"] {
            let hash = KeyHash::of(probe.as_bytes());
            assert!(
                hash.in_range(&owned_start, &owned_end)
                    != hash.in_range(&sync_start, &sync_end)
            );
        }
    }

    #[test]
    fn test_singleton_has_no_ranges() {
        let mut ring = HashRing::new(4, 2);
        ring.add_node("alpha", "10.0.0.1:7000").unwrap();
        let topology = ring.topology_for("alpha").unwrap();
        assert!(topology.owned_range().is_none());
        assert!(topology.sync_range().is_none());
    }

    #[test]
    fn test_one_topology_per_member() {
        let mut ring = HashRing::new(4, 2);
        ring.add_node("alpha", "10.0.0.1:7000").unwrap();
        ring.add_node("beta", "10.0.0.2:7000").unwrap();
        let topologies = ring.topologies();
        assert_eq!(topologies.len(), 2);
        let mut servers: Vec<&str> = topologies.iter().map(|t| t.node.server.as_str()).collect();
        servers.sort();
        assert_eq!(servers, ["10.0.0.1:7000", "10.0.0.2:7000"]);
    }
}
