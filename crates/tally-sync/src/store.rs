//! Storage collaborator for serialized lists.
//!
//! Nodes persist each user's list as an opaque versioned blob keyed by the
//! user key. The anti-entropy engine only needs the narrow contract below:
//! point lookup, overwrite, join-merge, and a circular hash-range scan.
//! Durable backends stay behind this trait; the in-memory implementation
//! backs tests, the simulation binary, and the demo app.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tally_core::blob::{self, BlobError};
use tally_ring::KeyHash;
use thiserror::Error;

/// Errors surfaced by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// One stored list: the user key, its ring position, and the serialized
/// CRDT state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredList {
    pub key: String,
    pub key_hash: KeyHash,
    pub blob: Vec<u8>,
}

impl StoredList {
    pub fn new(key: impl Into<String>, blob: Vec<u8>) -> Self {
        let key = key.into();
        let key_hash = KeyHash::of(key.as_bytes());
        Self {
            key,
            key_hash,
            blob,
        }
    }
}

/// Narrow storage contract the node runtime and sync engine depend on.
#[async_trait]
pub trait ListStore: Send + Sync + 'static {
    /// Fetch the stored list for `key`, if any.
    async fn get(&self, key: &str) -> Option<StoredList>;

    /// Overwrite the stored list for the entry's key.
    async fn put(&self, entry: StoredList);

    /// Merge an incoming entry into storage: when a list already exists
    /// under that key, both blobs are decoded, joined, and the result
    /// written back; otherwise the entry is inserted as new.
    async fn merge(&self, entry: StoredList) -> Result<(), StoreError>;

    /// All entries whose key hash falls in the circular range
    /// `(start, end]`.
    async fn scan_range(&self, start: &KeyHash, end: &KeyHash) -> Vec<StoredList>;

    /// Number of stored lists.
    async fn len(&self) -> usize;
}

/// In-memory list storage.
///
/// A single reader/writer lock over the map gives each merge per-entry
/// atomicity; no await point ever falls inside the critical section.
#[derive(Default)]
pub struct MemoryListStore {
    entries: RwLock<BTreeMap<String, StoredList>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, for inspection in tests and demos.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn get(&self, key: &str) -> Option<StoredList> {
        self.entries.read().get(key).cloned()
    }

    async fn put(&self, entry: StoredList) {
        self.entries.write().insert(entry.key.clone(), entry);
    }

    async fn merge(&self, entry: StoredList) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        match entries.get(&entry.key) {
            Some(existing) => {
                let mut local = blob::decode(&existing.blob)?;
                let mut remote = blob::decode(&entry.blob)?;
                local.join(&mut remote);
                let merged = blob::encode(&local)?;
                entries.insert(
                    entry.key.clone(),
                    StoredList {
                        key: entry.key,
                        key_hash: entry.key_hash,
                        blob: merged,
                    },
                );
            }
            None => {
                entries.insert(entry.key.clone(), entry);
            }
        }
        Ok(())
    }

    async fn scan_range(&self, start: &KeyHash, end: &KeyHash) -> Vec<StoredList> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.key_hash.in_range(start, end))
            .cloned()
            .collect()
    }

    async fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ReplicatedList;

    fn list_blob(replica_id: &str, key: &str, increments: usize) -> Vec<u8> {
        let mut list = ReplicatedList::new(replica_id);
        for _ in 0..increments {
            list.increment(key);
        }
        blob::encode(&list).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryListStore::new();
        let entry = StoredList::new("alice", list_blob("r1", "milk", 2));
        store.put(entry.clone()).await;
        assert_eq!(store.get("alice").await, Some(entry));
        assert_eq!(store.get("bob").await, None);
    }

    #[tokio::test]
    async fn test_merge_inserts_when_absent() {
        let store = MemoryListStore::new();
        store
            .merge(StoredList::new("alice", list_blob("r1", "milk", 1)))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_merge_joins_existing_state() {
        let store = MemoryListStore::new();
        store
            .put(StoredList::new("alice", list_blob("r1", "milk", 2)))
            .await;
        store
            .merge(StoredList::new("alice", list_blob("r2", "milk", 3)))
            .await
            .unwrap();

        let stored = store.get("alice").await.unwrap();
        let merged = blob::decode(&stored.blob).unwrap();
        assert_eq!(merged.value("milk"), 5);
    }

    #[tokio::test]
    async fn test_merge_rejects_garbage_blob() {
        let store = MemoryListStore::new();
        store
            .put(StoredList::new("alice", list_blob("r1", "milk", 1)))
            .await;
        let garbage = StoredList::new("alice", b"not a list".to_vec());
        assert!(store.merge(garbage).await.is_err());

        // The stored state is untouched by the rejected merge.
        let stored = store.get("alice").await.unwrap();
        assert_eq!(blob::decode(&stored.blob).unwrap().value("milk"), 1);
    }

    #[tokio::test]
    async fn test_scan_range_honors_wraparound() {
        let store = MemoryListStore::new();
        for key in ["alice", "bob", "carol", "dave", "erin"] {
            store
                .put(StoredList::new(key, list_blob("r1", "milk", 1)))
                .await;
        }

        let start = KeyHash::of(b"cut-one");
        let end = KeyHash::of(b"cut-two");
        let inside = store.scan_range(&start, &end).await;
        let outside = store.scan_range(&end, &start).await;

        // The two complementary ranges cover every entry exactly once.
        assert_eq!(inside.len() + outside.len(), 5);
        for entry in inside {
            assert!(entry.key_hash.in_range(&start, &end));
        }
    }
}
