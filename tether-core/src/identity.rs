//! Identity types for Tether records

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of an outbox or offline-queue entry.
pub type OperationId = Uuid;

/// Field separator used when hashing identity tuples.
const IDENTITY_SEPARATOR: &[u8] = b"\x1f";

/// Number of digest bytes kept in a record id (32 hex chars).
const RECORD_ID_BYTES: usize = 16;

/// Generate a new UUIDv7 operation id.
///
/// The random tail makes collisions negligible, so entries can be appended
/// to a queue while another task is draining it.
pub fn new_operation_id() -> OperationId {
    Uuid::now_v7()
}

/// Normalize an identity field: trim, collapse inner whitespace, lowercase.
pub fn normalize_identity(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Derive the id of a keyword record from its identity fields.
///
/// Pure function of the normalized `(keyword, group, cluster)` tuple, so the
/// same logical keyword always maps to the same key no matter how many times
/// it is pulled.
pub fn keyword_record_id(keyword: &str, group_name: &str, cluster: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_identity(keyword).as_bytes());
    hasher.update(IDENTITY_SEPARATOR);
    hasher.update(normalize_identity(group_name).as_bytes());
    hasher.update(IDENTITY_SEPARATOR);
    hasher.update(normalize_identity(cluster.unwrap_or_default()).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..RECORD_ID_BYTES])
}
