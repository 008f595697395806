//! Versioned serialization of a replicated list.
//!
//! Lists travel between clients, storage, and peer nodes as opaque blobs.
//! The encoding here is an explicit, versioned JSON envelope rather than a
//! language-specific binary format, so any implementation that understands
//! the schema can decode it. The payload is plain ASCII-safe JSON.

use crate::context::{CausalContext, Dot, ReplicaId};
use crate::counter::{Counter, DotStore};
use crate::list::ReplicatedList;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Current envelope version.
pub const BLOB_VERSION: u32 = 1;

/// Errors produced when decoding a list blob. Malformed input is rejected
/// at this boundary and never reaches CRDT state.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("malformed list blob: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported list blob version {0}")]
    UnsupportedVersion(u32),
}

/// The on-the-wire shape of a serialized list.
#[derive(Debug, Serialize, Deserialize)]
struct ListBlob {
    version: u32,
    replica_id: ReplicaId,
    compacted: BTreeMap<ReplicaId, u64>,
    pending: Vec<Dot>,
    items: BTreeMap<String, Vec<(Dot, Counter)>>,
}

/// Serialize a list into its versioned blob form.
pub fn encode(list: &ReplicatedList) -> Result<Vec<u8>, BlobError> {
    let blob = ListBlob {
        version: BLOB_VERSION,
        replica_id: list.replica_id.clone(),
        compacted: list.ctx.compacted.clone(),
        pending: list.ctx.pending.iter().cloned().collect(),
        items: list
            .items
            .iter()
            .map(|(key, store)| {
                let slots = store.iter().map(|(d, c)| (d.clone(), *c)).collect();
                (key.clone(), slots)
            })
            .collect(),
    };
    Ok(serde_json::to_vec(&blob)?)
}

/// Decode a blob back into a list, rejecting unknown versions.
pub fn decode(bytes: &[u8]) -> Result<ReplicatedList, BlobError> {
    let blob: ListBlob = serde_json::from_slice(bytes)?;
    if blob.version != BLOB_VERSION {
        return Err(BlobError::UnsupportedVersion(blob.version));
    }

    let mut ctx = CausalContext::new();
    ctx.compacted = blob.compacted;
    ctx.pending = blob.pending.into_iter().collect();

    let items = blob
        .items
        .into_iter()
        .map(|(key, slots)| {
            let mut store = DotStore::new();
            for (dot, counter) in slots {
                store.insert(dot, counter);
            }
            (key, store)
        })
        .collect();

    Ok(ReplicatedList {
        items,
        ctx,
        replica_id: blob.replica_id,
    })
}
