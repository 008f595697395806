//! Cluster-level convergence tests for the anti-entropy engine.
//!
//! These wire engines together over the in-memory mesh exactly the way
//! node runtimes do: ring topologies are broadcast, entries travel as
//! serialized blobs through the wire codecs, and convergence is asserted
//! on decoded values.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{blob, ReplicatedList};
use tally_ring::{HashRing, NeighborTopology};
use tally_sync::{
    ListStore, MemoryListStore, MemoryMesh, RetryPolicy, StoreError, StoredList, SyncEngine,
    SyncHandler, SyncRequest, SyncResponse,
};

/// The inbound half of a node, delegating to its engine and store.
struct EngineNode {
    engine: Arc<SyncEngine<MemoryListStore, MemoryMesh>>,
}

#[async_trait]
impl SyncHandler for EngineNode {
    async fn handle_sync(&self, request: SyncRequest) -> Result<SyncResponse, StoreError> {
        self.engine.handle_request(request).await
    }

    async fn handle_put_list(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.engine
            .store()
            .merge(StoredList::new(key, blob.to_vec()))
            .await
    }

    async fn handle_get_list(&self, key: &str) -> Option<Vec<u8>> {
        self.engine.store().get(key).await.map(|entry| entry.blob)
    }

    async fn handle_topology(&self, topology: NeighborTopology) {
        self.engine.set_topology(topology);
    }

    async fn handle_request_keys(&self) {
        self.engine.sync_round().await;
    }
}

struct Cluster {
    mesh: Arc<MemoryMesh>,
    ring: HashRing,
    engines: Vec<Arc<SyncEngine<MemoryListStore, MemoryMesh>>>,
    servers: Vec<String>,
}

impl Cluster {
    async fn new(node_count: usize, replication_factor: usize) -> Self {
        let mesh = MemoryMesh::new();
        let mut ring = HashRing::new(4, replication_factor);
        let mut engines = Vec::new();
        let mut servers = Vec::new();

        for i in 0..node_count {
            let id = format!("node-{}", i);
            let server = format!("10.0.0.{}:7000", i + 1);
            ring.add_node(&id, &server).unwrap();

            let engine = Arc::new(
                SyncEngine::new(&id, Arc::new(MemoryListStore::new()), mesh.clone()).with_retry(
                    RetryPolicy {
                        max_attempts: 2,
                        base_delay: Duration::from_millis(1),
                    },
                ),
            );
            mesh.register(
                &server,
                Arc::new(EngineNode {
                    engine: engine.clone(),
                }),
            );
            engines.push(engine);
            servers.push(server);
        }

        let cluster = Self {
            mesh,
            ring,
            engines,
            servers,
        };
        cluster.broadcast_topologies().await;
        cluster
    }

    async fn broadcast_topologies(&self) {
        for topology in self.ring.topologies() {
            let server = topology.node.server.clone();
            self.mesh.push_topology(&server, &topology).await.unwrap();
        }
    }

    async fn run_rounds(&self, rounds: usize) {
        for _ in 0..rounds {
            for engine in &self.engines {
                engine.sync_round().await;
            }
        }
    }

    /// Merge a client's serialized list into one node's storage, the way
    /// an upload landing at that replica would.
    async fn upload(&self, node: usize, key: &str, list: &ReplicatedList) {
        let bytes = blob::encode(list).unwrap();
        self.engines[node]
            .store()
            .merge(StoredList::new(key, bytes))
            .await
            .unwrap();
    }

    /// Decoded value of `key`'s item on every node that stores it.
    async fn values(&self, key: &str, item: &str) -> Vec<i64> {
        let mut values = Vec::new();
        for engine in &self.engines {
            if let Some(entry) = engine.store().get(key).await {
                values.push(blob::decode(&entry.blob).unwrap().value(item));
            }
        }
        values
    }
}

#[tokio::test]
async fn test_diverged_replicas_converge() {
    let cluster = Cluster::new(3, 2).await;

    let mut c1 = ReplicatedList::new("r1");
    c1.increment("milk");
    c1.increment("milk");
    cluster.upload(0, "alice@example.com", &c1).await;

    let mut c2 = ReplicatedList::new("r2");
    c2.increment("milk");
    c2.increment("milk");
    c2.increment("milk");
    c2.decrement("milk");
    cluster.upload(1, "alice@example.com", &c2).await;

    cluster.run_rounds(2).await;

    let values = cluster.values("alice@example.com", "milk").await;
    assert_eq!(values, vec![4, 4, 4]);
}

#[tokio::test]
async fn test_new_joiner_pulls_its_share() {
    let mut cluster = Cluster::new(2, 2).await;

    for (i, user) in ["alice", "bob", "carol", "dave", "erin", "frank"]
        .iter()
        .enumerate()
    {
        let mut list = ReplicatedList::new("seed");
        for _ in 0..=i {
            list.increment("milk");
        }
        cluster.upload(0, user, &list).await;
        cluster.upload(1, user, &list).await;
    }

    // A third node joins: register it, recompute and rebroadcast topologies.
    let id = "node-2";
    let server = "10.0.0.3:7000";
    cluster.ring.add_node(id, server).unwrap();
    let engine = Arc::new(
        SyncEngine::new(id, Arc::new(MemoryListStore::new()), cluster.mesh.clone()).with_retry(
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        ),
    );
    cluster.mesh.register(
        server,
        Arc::new(EngineNode {
            engine: engine.clone(),
        }),
    );
    cluster.engines.push(engine.clone());
    cluster.servers.push(server.to_string());
    cluster.broadcast_topologies().await;

    // The joiner's own round hands it everything outside its owned range;
    // its back neighbors' rounds push the rest.
    engine.sync_round().await;
    cluster.run_rounds(1).await;

    for (i, user) in ["alice", "bob", "carol", "dave", "erin", "frank"]
        .iter()
        .enumerate()
    {
        let entry = engine.store().get(user).await;
        let entry = entry.unwrap_or_else(|| panic!("joiner missing {user}"));
        let list = blob::decode(&entry.blob).unwrap();
        assert_eq!(list.value("milk"), (i + 1) as i64);
    }
}

#[tokio::test]
async fn test_partition_defers_convergence_without_corruption() {
    let cluster = Cluster::new(3, 2).await;

    let mut c1 = ReplicatedList::new("r1");
    c1.increment("bread");
    cluster.upload(0, "alice@example.com", &c1).await;

    // Node 2 goes down: unreachable, and running no rounds of its own.
    cluster.mesh.sever(&cluster.servers[2]);
    for _ in 0..2 {
        cluster.engines[0].sync_round().await;
        cluster.engines[1].sync_round().await;
    }

    // The reachable replicas converge; the downed node stays behind.
    let reachable = cluster.values("alice@example.com", "bread").await;
    assert_eq!(reachable, vec![1, 1]);

    cluster.mesh.heal(&cluster.servers[2]);
    cluster.run_rounds(2).await;
    let values = cluster.values("alice@example.com", "bread").await;
    assert_eq!(values, vec![1, 1, 1]);
}

#[tokio::test]
async fn test_removal_propagates_and_concurrent_add_wins() {
    let cluster = Cluster::new(3, 2).await;

    // r1 seeds the list; the cluster replicates it.
    let mut c1 = ReplicatedList::new("r1");
    c1.increment("bread");
    c1.increment("bread");
    cluster.upload(0, "alice@example.com", &c1).await;
    cluster.run_rounds(2).await;
    assert_eq!(cluster.values("alice@example.com", "bread").await, vec![2, 2, 2]);

    // r2 reads the replicated state and removes the item; the removal
    // fans out to every replica, as a routed upload would. Without
    // tombstones a replica never reached would donate the item right
    // back, so completing the fan-out is what makes removal stick.
    let fetched = cluster.engines[1]
        .store()
        .get("alice@example.com")
        .await
        .unwrap();
    let mut c2 = ReplicatedList::new("r2");
    let mut snapshot = blob::decode(&fetched.blob).unwrap();
    c2.join(&mut snapshot);
    c2.remove("bread");
    for node in 0..3 {
        cluster.upload(node, "alice@example.com", &c2).await;
    }

    // r3 concurrently adds to the same item, landing at a single node,
    // without ever seeing r2's removal.
    let mut c3 = ReplicatedList::new("r3");
    c3.increment("bread");
    cluster.upload(2, "alice@example.com", &c3).await;

    cluster.run_rounds(3).await;

    // r2's removal dropped everything it observed; r3's unobserved
    // addition survives on every replica.
    let values = cluster.values("alice@example.com", "bread").await;
    assert_eq!(values, vec![1, 1, 1]);
}
