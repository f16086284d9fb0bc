//! Helpers for constructing, identifying, and decoding Qdrant payloads.

use crate::store::{NamespaceKey, RecordMetadata, VectorRecord};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Build the payload object stored alongside each vector.
pub(crate) fn build_payload(key: &NamespaceKey, record: &VectorRecord, indexed_at: &str) -> Value {
    json!({
        "namespace": key.to_namespace(),
        "record_id": record.id,
        "paper_id": key.paper_id.as_str(),
        "source": record.metadata.source.as_str(),
        "section": record.metadata.section.as_str(),
        "text": record.metadata.text,
        "chunk_hash": compute_chunk_hash(&record.metadata.text),
        "indexed_at": indexed_at,
    })
}

/// Decode the metadata fields of a stored payload. Returns `None` when required fields are
/// missing or invalid.
pub(crate) fn parse_metadata(payload: Map<String, Value>) -> Option<RecordMetadata> {
    serde_json::from_value(Value::Object(payload)).ok()
}

/// Qdrant point ids must be UUIDs or integers; derive a stable UUID from the namespace and
/// record id so rewriting a record replaces its own point and no other namespace's.
pub(crate) fn point_id(key: &NamespaceKey, record_id: &str) -> Uuid {
    let scoped = format!("{}/{}", key.to_namespace(), record_id);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, scoped.as_bytes())
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
