//! # Snapshot Format
//!
//! Binary serialization of the cache's base layer for offline storage.
//!
//! Format: Header (5 bytes) + postcard-serialized payload.
//! - 4 bytes: Magic ("STRC")
//! - 1 byte: Version
//!
//! Only the base layer (records, links, reference counts) is serialized;
//! optimistic overlays are volatile and belong to in-flight mutations that
//! cannot survive a restart. Hydration re-schedules entities whose
//! persisted refcount is not positive, so a sweep after loading restores
//! the usual invariants.
//!
//! The header is validated before the payload is parsed, and the payload
//! size is bounded, so corrupted or hostile input fails fast instead of
//! allocating.

use crate::data::InMemoryData;
use crate::types::{CacheError, EntityKey, FieldKey, Link, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes identifying a snapshot.
pub const MAGIC_BYTES: &[u8; 4] = b"STRC";

/// Current snapshot format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum allowed payload size. Validated before deserialization.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 256 * 1024 * 1024; // 256 MB

/// Header length in bytes.
const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The snapshot header precedes all payload data.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), CacheError> {
        if &self.magic != MAGIC_BYTES {
            return Err(CacheError::Snapshot("invalid magic bytes".to_string()));
        }
        if self.version != FORMAT_VERSION {
            return Err(CacheError::Snapshot(format!(
                "unsupported version: {} (expected {FORMAT_VERSION})",
                self.version
            )));
        }
        Ok(())
    }

    /// Write the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CacheError::Snapshot("header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Self-describing mirror of [`Value`] for the binary payload.
///
/// `Value` serializes untagged, which suits the JSON-facing surfaces but
/// cannot be read back from a non-self-describing format; the snapshot
/// payload stores this tagged form instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoredValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<StoredValue>),
    Object(BTreeMap<String, StoredValue>),
}

impl From<&Value> for StoredValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Boolean(v) => Self::Boolean(*v),
            Value::Int(v) => Self::Int(*v),
            Value::Float(v) => Self::Float(*v),
            Value::String(v) => Self::String(v.clone()),
            Value::List(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<StoredValue> for Value {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Null => Self::Null,
            StoredValue::Boolean(v) => Self::Boolean(v),
            StoredValue::Int(v) => Self::Int(v),
            StoredValue::Float(v) => Self::Float(v),
            StoredValue::String(v) => Self::String(v),
            StoredValue::List(items) => Self::List(items.into_iter().map(Self::from).collect()),
            StoredValue::Object(map) => Self::Object(
                map.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            ),
        }
    }
}

/// The serialized base layer.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotPayload {
    records: BTreeMap<EntityKey, BTreeMap<FieldKey, StoredValue>>,
    links: BTreeMap<EntityKey, BTreeMap<FieldKey, Link>>,
    ref_counts: BTreeMap<EntityKey, i64>,
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a store's base layer to bytes (header + payload).
///
/// This is a pure transformation; file I/O belongs to the caller.
pub fn write_snapshot(data: &InMemoryData) -> Result<Vec<u8>, CacheError> {
    let (records, links, ref_counts) = data.base_parts();
    let payload = SnapshotPayload {
        records: records
            .iter()
            .map(|(key, fields)| {
                (
                    key.clone(),
                    fields
                        .iter()
                        .map(|(field, value)| (field.clone(), StoredValue::from(value)))
                        .collect(),
                )
            })
            .collect(),
        links: links.clone(),
        ref_counts: ref_counts.clone(),
    };

    let body = postcard::to_stdvec(&payload)
        .map_err(|error| CacheError::Snapshot(error.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    bytes.extend_from_slice(&SnapshotHeader::new().to_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Rebuild a store's base layer from snapshot bytes.
pub fn read_snapshot(bytes: &[u8], query_root: EntityKey) -> Result<InMemoryData, CacheError> {
    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    let body = &bytes[HEADER_SIZE..];
    if body.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(CacheError::Snapshot(format!(
            "payload too large: {} bytes (max {MAX_SNAPSHOT_PAYLOAD_SIZE})",
            body.len()
        )));
    }

    let payload: SnapshotPayload = postcard::from_bytes(body)
        .map_err(|error| CacheError::Snapshot(error.to_string()))?;

    let records = payload
        .records
        .into_iter()
        .map(|(key, fields)| {
            (
                key,
                fields
                    .into_iter()
                    .map(|(field, value)| (field, Value::from(value)))
                    .collect(),
            )
        })
        .collect();
    Ok(InMemoryData::from_base_parts(
        query_root,
        records,
        payload.links,
        payload.ref_counts,
    ))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OpContext;

    fn sample_data() -> InMemoryData {
        let mut data = InMemoryData::default();
        let mut ctx = OpContext::base();
        data.write_record(
            &mut ctx,
            EntityKey::new("Todo:1"),
            FieldKey::new("__typename"),
            Some(Value::from("Todo")),
        );
        data.write_record(
            &mut ctx,
            EntityKey::new("Todo:1"),
            FieldKey::new("text"),
            Some(Value::from("Go")),
        );
        data.write_link(
            &mut ctx,
            EntityKey::new("Query"),
            FieldKey::new("todos"),
            Some(Link::List(vec![Link::Entity(EntityKey::new("Todo:1"))])),
        );
        data
    }

    #[test]
    fn snapshot_roundtrip_preserves_base_layer() {
        let data = sample_data();
        let bytes = write_snapshot(&data).expect("serialize");
        let back = read_snapshot(&bytes, EntityKey::new("Query")).expect("deserialize");

        assert_eq!(
            back.peek_record(&EntityKey::new("Todo:1"), &FieldKey::new("text")),
            Some(&Value::from("Go"))
        );
        assert_eq!(
            back.peek_link(&EntityKey::new("Query"), &FieldKey::new("todos")),
            Some(&Link::List(vec![Link::Entity(EntityKey::new("Todo:1"))]))
        );
    }

    #[test]
    fn refcounts_survive_hydration() {
        let data = sample_data();
        let bytes = write_snapshot(&data).expect("serialize");
        let mut back = read_snapshot(&bytes, EntityKey::new("Query")).expect("deserialize");

        // Referenced entities are not collected by the post-load sweep.
        back.gc();
        assert!(back.has_entity(&EntityKey::new("Todo:1")));
    }

    #[test]
    fn invalid_magic_is_rejected() {
        let data = sample_data();
        let mut bytes = write_snapshot(&data).expect("serialize");
        bytes[0] = b'X';
        assert!(matches!(
            read_snapshot(&bytes, EntityKey::new("Query")),
            Err(CacheError::Snapshot(_))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let data = sample_data();
        let mut bytes = write_snapshot(&data).expect("serialize");
        bytes[4] = FORMAT_VERSION + 1;
        assert!(matches!(
            read_snapshot(&bytes, EntityKey::new("Query")),
            Err(CacheError::Snapshot(_))
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(matches!(
            read_snapshot(&[0u8; 3], EntityKey::new("Query")),
            Err(CacheError::Snapshot(_))
        ));
    }

    #[test]
    fn stored_value_mirrors_all_shapes() {
        let value = Value::object([
            ("id", Value::from("1")),
            ("done", Value::from(false)),
            ("count", Value::from(3i64)),
            ("score", Value::from(0.5f64)),
            ("tags", Value::list(["a", "b"])),
            ("meta", Value::Null),
        ]);
        let stored = StoredValue::from(&value);
        assert_eq!(Value::from(stored), value);
    }
}
