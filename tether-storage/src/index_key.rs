//! Secondary index keys for keyword lookups.
//!
//! An index row maps `(indexed value, record id)` to nothing; LMDB keeps rows
//! sorted, so every record sharing an indexed value sits under one prefix.

use serde::{Deserialize, Serialize};

/// Separator byte between the indexed value and the record id.
///
/// 0xFF never occurs in UTF-8, so it cannot collide with a group name or
/// filename.
const SEPARATOR: u8 = 0xFF;

/// Secondary indexes maintained over keyword records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordIndex {
    /// Keywords by group name.
    Group,
    /// Keywords by source filename.
    SourceFile,
}

/// A key in one of the keyword index databases.
///
/// # Binary Format
///
/// `[value: utf-8 bytes][separator: 0xFF][record id: utf-8 bytes]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    value: String,
    record_id: String,
}

impl IndexKey {
    pub fn new(value: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            record_id: record_id.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::prefix(&self.value);
        bytes.extend_from_slice(self.record_id.as_bytes());
        bytes
    }

    /// Decode a key. Returns `None` for a missing separator or invalid UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == SEPARATOR)?;
        let value = std::str::from_utf8(&bytes[..split]).ok()?;
        let record_id = std::str::from_utf8(&bytes[split + 1..]).ok()?;
        Some(Self::new(value, record_id))
    }

    /// Prefix shared by every row indexed under `value`.
    pub fn prefix(value: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(value.len() + 1);
        prefix.extend_from_slice(value.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}
