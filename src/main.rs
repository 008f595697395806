//! Whole-cluster convergence simulation.
//!
//! Boots a coordinator and a mesh of in-memory storage nodes, drives
//! diverged client replicas against different nodes, lets the periodic
//! anti-entropy tasks run, and verifies that every replica of every list
//! converges, including through a node outage and recovery.

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{blob, ReplicatedList};
use tally_node::{Coordinator, NodeConfigBuilder, NodeRuntime};
use tally_sync::{wire, MemoryListStore, MemoryMesh, RetryPolicy};

const USERS: [&str; 3] = [
    "alice@example.com",
    "bob@example.com",
    "carol@example.com",
];
const ITEMS: [&str; 4] = ["milk", "bread", "eggs", "tea"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

fn banner(text: &str) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║ {:<58} ║", text);
    println!("╚════════════════════════════════════════════════════════════╝");
}

type Node = NodeRuntime<MemoryListStore, MemoryMesh>;

async fn async_main() {
    let config = NodeConfigBuilder::new()
        .sync_interval(Duration::from_millis(50))
        .retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        })
        .build();

    banner("CLUSTER BOOTSTRAP");
    let mesh = MemoryMesh::new();
    let coordinator = Coordinator::new(&config, mesh.clone());
    let mut nodes: Vec<Arc<Node>> = Vec::new();

    for i in 0..4 {
        let node = Arc::new(NodeRuntime::new(
            format!("node-{}", i),
            format!("10.0.0.{}:7000", i + 1),
            Arc::new(MemoryListStore::new()),
            mesh.clone(),
            config.clone(),
        ));
        mesh.register(node.server(), node.clone());
        coordinator
            .handle_join(&wire::encode_join(&node.join_message()))
            .await
            .unwrap();
        println!("  joined {} at {}", node.id(), node.server());
        nodes.push(node);
    }
    println!("  members: {}", coordinator.members().len());

    banner("DIVERGED CLIENT UPLOADS");
    let mut rng = rand::thread_rng();
    let mut expected: BTreeMap<&str, BTreeMap<&str, i64>> = BTreeMap::new();

    for user in USERS {
        let totals = expected.entry(user).or_default();
        // Two independent client replicas per user, uploaded separately;
        // the cluster sees them as diverged copies of the same list.
        for replica in ["phone", "laptop"] {
            let mut list = ReplicatedList::new(format!("{}-{}", user, replica));
            for item in ITEMS {
                let increments = rng.gen_range(0..4);
                let decrements = rng.gen_range(0..=increments);
                for _ in 0..increments {
                    list.increment(item);
                }
                for _ in 0..decrements {
                    list.decrement(item);
                }
                *totals.entry(item).or_default() += increments as i64 - decrements as i64;
            }
            coordinator
                .put_list(user, &blob::encode(&list).unwrap())
                .await
                .unwrap();
            println!("  uploaded {}'s {} replica", user, replica);
        }
    }

    banner("ANTI-ENTROPY");
    let tasks: Vec<_> = nodes.iter().map(|n| n.spawn_sync()).collect();
    tokio::time::sleep(Duration::from_millis(400)).await;
    for task in tasks {
        task.abort();
    }
    println!("  periodic sync ran on {} nodes", nodes.len());

    banner("CONVERGENCE CHECK");
    verify_converged(&nodes, &expected).await;

    banner("NODE OUTAGE AND RECOVERY");
    // Take down a node that is not the primary owner of any user's list,
    // so uploads keep succeeding while one replica misses them.
    let primaries: Vec<String> = USERS
        .iter()
        .map(|user| coordinator.ring().get(user).unwrap())
        .collect();
    let downed = nodes
        .iter()
        .map(|node| node.server().to_string())
        .find(|server| !primaries.contains(server))
        .unwrap();
    mesh.sever(&downed);
    println!("  {} is down", downed);

    for user in USERS {
        let mut list = ReplicatedList::new(format!("{}-tablet", user));
        list.increment("coffee");
        list.increment("coffee");
        *expected
            .get_mut(user)
            .unwrap()
            .entry("coffee")
            .or_default() += 2;
        coordinator
            .put_list(user, &blob::encode(&list).unwrap())
            .await
            .unwrap();
    }
    println!("  uploads accepted while a replica was unreachable");

    mesh.heal(&downed);
    for _ in 0..3 {
        for node in &nodes {
            node.request_keys().await;
        }
    }
    println!("  {} healed and caught up", downed);
    verify_converged(&nodes, &expected).await;

    println!("\n✓ All replicas converged on every list");
}

async fn verify_converged(nodes: &[Arc<Node>], expected: &BTreeMap<&str, BTreeMap<&str, i64>>) {
    for (user, totals) in expected {
        let mut per_node: Vec<(String, ReplicatedList)> = Vec::new();
        for node in nodes {
            if let Some(bytes) = node.get_list(user).await {
                per_node.push((node.id().to_string(), blob::decode(&bytes).unwrap()));
            }
        }
        assert!(!per_node.is_empty(), "no replica holds {}", user);

        for (item, &total) in totals {
            for (node_id, list) in &per_node {
                assert_eq!(
                    list.value(item),
                    total,
                    "{} sees {}={} for {}",
                    node_id,
                    item,
                    list.value(item),
                    user
                );
            }
        }
        println!(
            "  {} consistent on {} replicas: {:?}",
            user,
            per_node.len(),
            totals
        );
    }
}
