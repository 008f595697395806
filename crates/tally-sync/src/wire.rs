//! Wire codecs for cluster messages.
//!
//! The cluster speaks a small set of delimited text messages: node join,
//! neighbor-topology broadcast, and the sync request/response pair. Every
//! parser here rejects malformed input at the boundary; nothing half-parsed
//! ever reaches ring or CRDT state.
//!
//! Message shapes:
//!
//! ```text
//! join       "<nodeId>,<serverAddress>"
//! topology   segments joined "****", fields joined ",,,",
//!            field = label:::server:::hash
//!            labels: node-self | frontNeighborN | backNeighborN
//! sync req   "<startHashHex>****<endHashHex>[****<entry>++++<entry>...]"
//! sync resp  entries joined "****"
//! entry      "<blob>####<key>####<keyHash>"
//! ```

use crate::store::StoredList;
use tally_ring::{KeyHash, NeighborTopology, TopologyEntry};
use thiserror::Error;

const SEGMENT_SEP: &str = "****";
const FIELD_SEP: &str = ",,,";
const LABEL_SEP: &str = ":::";
const ENTRY_SEP: &str = "++++";
const ENTRY_FIELD_SEP: &str = "####";

const SELF_LABEL: &str = "node-self";
const FRONT_LABEL: &str = "frontNeighbor";
const BACK_LABEL: &str = "backNeighbor";

/// Errors raised while parsing or producing wire messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("wrong field count in {0} message")]
    FieldCount(&'static str),

    #[error("bad hash on the wire: {0}")]
    BadHash(String),

    #[error("unknown topology label: {0}")]
    UnknownLabel(String),

    #[error("topology message has no node-self field")]
    MissingSelf,

    #[error("list blob is not wire-safe text")]
    UnencodableBlob,
}

/// A node announcing itself to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinMessage {
    pub node_id: String,
    pub server: String,
}

/// One anti-entropy exchange: the circular hash range being reconciled and
/// the sender's entries within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncRequest {
    pub start: KeyHash,
    pub end: KeyHash,
    pub entries: Vec<StoredList>,
}

/// The receiver's entries for the same range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncResponse {
    pub entries: Vec<StoredList>,
}

pub fn encode_join(message: &JoinMessage) -> String {
    format!("{},{}", message.node_id, message.server)
}

pub fn parse_join(input: &str) -> Result<JoinMessage, WireError> {
    let mut parts = input.split(',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(node_id), Some(server), None) if !node_id.is_empty() && !server.is_empty() => {
            Ok(JoinMessage {
                node_id: node_id.to_string(),
                server: server.to_string(),
            })
        }
        _ => Err(WireError::FieldCount("join")),
    }
}

fn encode_topology_field(label: &str, entry: &TopologyEntry) -> String {
    format!(
        "{}{}{}{}{}",
        label,
        LABEL_SEP,
        entry.server,
        LABEL_SEP,
        entry.hash.to_hex()
    )
}

pub fn encode_topology(topology: &NeighborTopology) -> String {
    let mut segments = vec![encode_topology_field(SELF_LABEL, &topology.node)];
    if !topology.front.is_empty() {
        let fields: Vec<String> = topology
            .front
            .iter()
            .enumerate()
            .map(|(i, e)| encode_topology_field(&format!("{}{}", FRONT_LABEL, i), e))
            .collect();
        segments.push(fields.join(FIELD_SEP));
    }
    if !topology.back.is_empty() {
        let fields: Vec<String> = topology
            .back
            .iter()
            .enumerate()
            .map(|(i, e)| encode_topology_field(&format!("{}{}", BACK_LABEL, i), e))
            .collect();
        segments.push(fields.join(FIELD_SEP));
    }
    segments.join(SEGMENT_SEP)
}

pub fn parse_topology(input: &str) -> Result<NeighborTopology, WireError> {
    let mut node = None;
    let mut front: Vec<(usize, TopologyEntry)> = Vec::new();
    let mut back: Vec<(usize, TopologyEntry)> = Vec::new();

    for segment in input.split(SEGMENT_SEP) {
        for field in segment.split(FIELD_SEP) {
            let parts: Vec<&str> = field.split(LABEL_SEP).collect();
            let [label, server, hash] = parts.as_slice() else {
                return Err(WireError::FieldCount("topology"));
            };
            let hash =
                KeyHash::from_hex(hash).ok_or_else(|| WireError::BadHash(hash.to_string()))?;
            let entry = TopologyEntry::new(*server, hash);

            if *label == SELF_LABEL {
                node = Some(entry);
            } else if let Some(index) = label.strip_prefix(FRONT_LABEL) {
                let index = index
                    .parse()
                    .map_err(|_| WireError::UnknownLabel(label.to_string()))?;
                front.push((index, entry));
            } else if let Some(index) = label.strip_prefix(BACK_LABEL) {
                let index = index
                    .parse()
                    .map_err(|_| WireError::UnknownLabel(label.to_string()))?;
                back.push((index, entry));
            } else {
                return Err(WireError::UnknownLabel(label.to_string()));
            }
        }
    }

    front.sort_by_key(|(index, _)| *index);
    back.sort_by_key(|(index, _)| *index);
    Ok(NeighborTopology {
        node: node.ok_or(WireError::MissingSelf)?,
        front: front.into_iter().map(|(_, e)| e).collect(),
        back: back.into_iter().map(|(_, e)| e).collect(),
    })
}

fn encode_entry(entry: &StoredList) -> Result<String, WireError> {
    let blob = std::str::from_utf8(&entry.blob).map_err(|_| WireError::UnencodableBlob)?;
    if blob.contains(ENTRY_FIELD_SEP) || blob.contains(ENTRY_SEP) || blob.contains(SEGMENT_SEP) {
        return Err(WireError::UnencodableBlob);
    }
    Ok(format!(
        "{}{}{}{}{}",
        blob,
        ENTRY_FIELD_SEP,
        entry.key,
        ENTRY_FIELD_SEP,
        entry.key_hash.to_hex()
    ))
}

fn parse_entry(input: &str) -> Result<StoredList, WireError> {
    let parts: Vec<&str> = input.split(ENTRY_FIELD_SEP).collect();
    let [blob, key, hash] = parts.as_slice() else {
        return Err(WireError::FieldCount("entry"));
    };
    let key_hash = KeyHash::from_hex(hash).ok_or_else(|| WireError::BadHash(hash.to_string()))?;
    Ok(StoredList {
        key: key.to_string(),
        key_hash,
        blob: blob.as_bytes().to_vec(),
    })
}

pub fn encode_sync_request(request: &SyncRequest) -> Result<String, WireError> {
    let mut message = format!(
        "{}{}{}",
        request.start.to_hex(),
        SEGMENT_SEP,
        request.end.to_hex()
    );
    if !request.entries.is_empty() {
        let entries: Vec<String> = request
            .entries
            .iter()
            .map(encode_entry)
            .collect::<Result<_, _>>()?;
        message.push_str(SEGMENT_SEP);
        message.push_str(&entries.join(ENTRY_SEP));
    }
    Ok(message)
}

pub fn parse_sync_request(input: &str) -> Result<SyncRequest, WireError> {
    let segments: Vec<&str> = input.split(SEGMENT_SEP).collect();
    let (start, end, entry_block) = match segments.as_slice() {
        [start, end] => (start, end, None),
        [start, end, entries] => (start, end, Some(entries)),
        _ => return Err(WireError::FieldCount("sync request")),
    };

    let start = KeyHash::from_hex(start).ok_or_else(|| WireError::BadHash(start.to_string()))?;
    let end = KeyHash::from_hex(end).ok_or_else(|| WireError::BadHash(end.to_string()))?;
    let entries = match entry_block {
        Some(block) => block
            .split(ENTRY_SEP)
            .map(parse_entry)
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    Ok(SyncRequest {
        start,
        end,
        entries,
    })
}

pub fn encode_sync_response(response: &SyncResponse) -> Result<String, WireError> {
    let entries: Vec<String> = response
        .entries
        .iter()
        .map(encode_entry)
        .collect::<Result<_, _>>()?;
    Ok(entries.join(SEGMENT_SEP))
}

pub fn parse_sync_response(input: &str) -> Result<SyncResponse, WireError> {
    if input.is_empty() {
        return Ok(SyncResponse::default());
    }
    let entries = input
        .split(SEGMENT_SEP)
        .map(parse_entry)
        .collect::<Result<_, _>>()?;
    Ok(SyncResponse { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{blob, ReplicatedList};

    fn sample_entry(key: &str) -> StoredList {
        let mut list = ReplicatedList::new("r1");
        list.increment("milk");
        StoredList::new(key, blob::encode(&list).unwrap())
    }

    fn sample_topology() -> NeighborTopology {
        NeighborTopology {
            node: TopologyEntry::new("10.0.0.1:7000", KeyHash::of(b"alpha")),
            front: vec![
                TopologyEntry::new("10.0.0.2:7000", KeyHash::of(b"beta")),
                TopologyEntry::new("10.0.0.3:7000", KeyHash::of(b"gamma")),
            ],
            back: vec![TopologyEntry::new("10.0.0.4:7000", KeyHash::of(b"delta"))],
        }
    }

    #[test]
    fn test_join_roundtrip() {
        let message = JoinMessage {
            node_id: "alpha".to_string(),
            server: "10.0.0.1:7000".to_string(),
        };
        assert_eq!(encode_join(&message), "alpha,10.0.0.1:7000");
        assert_eq!(parse_join(&encode_join(&message)).unwrap(), message);
    }

    #[test]
    fn test_join_rejects_wrong_field_count() {
        assert_eq!(parse_join("alpha"), Err(WireError::FieldCount("join")));
        assert_eq!(parse_join("a,b,c"), Err(WireError::FieldCount("join")));
        assert_eq!(parse_join(",server"), Err(WireError::FieldCount("join")));
    }

    #[test]
    fn test_topology_roundtrip() {
        let topology = sample_topology();
        let encoded = encode_topology(&topology);
        assert!(encoded.starts_with("node-self:::10.0.0.1:7000:::"));
        assert!(encoded.contains("frontNeighbor0:::"));
        assert!(encoded.contains("backNeighbor0:::"));
        assert_eq!(parse_topology(&encoded).unwrap(), topology);
    }

    #[test]
    fn test_topology_roundtrip_without_neighbors() {
        let topology = NeighborTopology {
            node: TopologyEntry::new("10.0.0.1:7000", KeyHash::of(b"alpha")),
            front: Vec::new(),
            back: Vec::new(),
        };
        assert_eq!(parse_topology(&encode_topology(&topology)).unwrap(), topology);
    }

    #[test]
    fn test_topology_rejects_bad_input() {
        assert_eq!(
            parse_topology("node-self:::only-two-parts"),
            Err(WireError::FieldCount("topology"))
        );
        assert_eq!(
            parse_topology("node-self:::server:::nothex"),
            Err(WireError::BadHash("nothex".to_string()))
        );
        let hash = KeyHash::of(b"x").to_hex();
        assert_eq!(
            parse_topology(&format!("sideNeighbor0:::server:::{}", hash)),
            Err(WireError::UnknownLabel("sideNeighbor0".to_string()))
        );
        assert_eq!(
            parse_topology(&format!("frontNeighbor0:::server:::{}", hash)),
            Err(WireError::MissingSelf)
        );
    }

    #[test]
    fn test_sync_request_roundtrip() {
        let request = SyncRequest {
            start: KeyHash::of(b"start"),
            end: KeyHash::of(b"end"),
            entries: vec![sample_entry("alice"), sample_entry("bob")],
        };
        let encoded = encode_sync_request(&request).unwrap();
        assert_eq!(parse_sync_request(&encoded).unwrap(), request);
    }

    #[test]
    fn test_sync_request_roundtrip_without_entries() {
        let request = SyncRequest {
            start: KeyHash::of(b"start"),
            end: KeyHash::of(b"end"),
            entries: Vec::new(),
        };
        let encoded = encode_sync_request(&request).unwrap();
        assert!(!encoded.contains(ENTRY_SEP));
        assert_eq!(parse_sync_request(&encoded).unwrap(), request);
    }

    #[test]
    fn test_sync_request_rejects_bad_bounds() {
        assert_eq!(
            parse_sync_request("justonehash"),
            Err(WireError::FieldCount("sync request"))
        );
        assert_eq!(
            parse_sync_request("deadbeef****cafebabe"),
            Err(WireError::BadHash("deadbeef".to_string()))
        );
    }

    #[test]
    fn test_sync_request_rejects_truncated_entry() {
        let start = KeyHash::of(b"start").to_hex();
        let end = KeyHash::of(b"end").to_hex();
        let message = format!("{}****{}****blob-without-fields", start, end);
        assert_eq!(
            parse_sync_request(&message),
            Err(WireError::FieldCount("entry"))
        );
    }

    #[test]
    fn test_sync_response_roundtrip() {
        let response = SyncResponse {
            entries: vec![sample_entry("alice"), sample_entry("bob")],
        };
        let encoded = encode_sync_response(&response).unwrap();
        assert_eq!(parse_sync_response(&encoded).unwrap(), response);
        assert_eq!(parse_sync_response("").unwrap(), SyncResponse::default());
    }
}
