//! Record types held by the local store

use crate::identity::{keyword_record_id, OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Synchronized collections.
///
/// Sync metadata is kept per collection; the outbox payloads name the
/// collection they target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Keywords,
    Groups,
    Files,
}

impl Collection {
    /// All synchronized collections, in pull order.
    pub const ALL: [Collection; 3] = [Collection::Groups, Collection::Keywords, Collection::Files];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Keywords => "keywords",
            Collection::Groups => "groups",
            Collection::Files => "files",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single keyword row.
///
/// The `id` is always derived from `(keyword, group_name, cluster)`; use
/// [`KeywordRecord::new`] or [`RemoteKeyword::into_record`] rather than
/// building the struct by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub id: String,
    pub keyword: String,
    pub group_name: String,
    /// Monthly search volume.
    pub volume: i64,
    /// Ranking difficulty, 0-100.
    pub difficulty: f64,
    pub cluster: Option<String>,
    pub source_file: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
}

impl KeywordRecord {
    /// Create a keyword record with a derived id.
    pub fn new(
        keyword: impl Into<String>,
        group_name: impl Into<String>,
        volume: i64,
        difficulty: f64,
        created_at: Timestamp,
    ) -> Self {
        let keyword = keyword.into();
        let group_name = group_name.into();
        Self {
            id: keyword_record_id(&keyword, &group_name, None),
            keyword,
            group_name,
            volume,
            difficulty,
            cluster: None,
            source_file: None,
            created_at,
            updated_at: None,
        }
    }

    /// Set the cluster label, re-deriving the id.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self.id = keyword_record_id(&self.keyword, &self.group_name, self.cluster.as_deref());
        self
    }

    /// Set the source file reference.
    pub fn with_source_file(mut self, filename: impl Into<String>) -> Self {
        self.source_file = Some(filename.into());
        self
    }

    /// Whether the stored id matches the identity fields.
    pub fn has_canonical_id(&self) -> bool {
        self.id == keyword_record_id(&self.keyword, &self.group_name, self.cluster.as_deref())
    }
}

/// Keyword as returned by the remote snapshot endpoint (no id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteKeyword {
    pub keyword: String,
    pub group_name: String,
    pub volume: i64,
    pub difficulty: f64,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl RemoteKeyword {
    /// Convert into a local record, deriving the deterministic id.
    pub fn into_record(self) -> KeywordRecord {
        KeywordRecord {
            id: keyword_record_id(&self.keyword, &self.group_name, self.cluster.as_deref()),
            keyword: self.keyword,
            group_name: self.group_name,
            volume: self.volume,
            difficulty: self.difficulty,
            cluster: self.cluster,
            source_file: self.source_file,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<KeywordRecord> for RemoteKeyword {
    fn from(record: KeywordRecord) -> Self {
        Self {
            keyword: record.keyword,
            group_name: record.group_name,
            volume: record.volume,
            difficulty: record.difficulty,
            cluster: record.cluster,
            source_file: record.source_file,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Per-group aggregate, replaced wholesale on every pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub name: String,
    pub keyword_count: u64,
    pub total_volume: i64,
    pub average_difficulty: f64,
    /// Member keyword ids, in remote order.
    pub keyword_ids: Vec<String>,
    pub last_synced_at: Timestamp,
}

/// An imported keyword file, replaced wholesale on every pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub keyword_count: u64,
    pub groups: Vec<String>,
    pub keyword_ids: Vec<String>,
    pub imported_at: Timestamp,
}

/// Diagnostics row kept for each synchronized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub collection: Collection,
    pub version: u64,
    pub last_sync: Option<Timestamp>,
    /// Outbox entries still outstanding when the row was written.
    pub pending_operation_ids: Vec<OperationId>,
}

impl SyncMetadata {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            version: 0,
            last_sync: None,
            pending_operation_ids: Vec::new(),
        }
    }

    /// Advance the row after a cycle that made progress.
    pub fn advance(&mut self, at: Timestamp, pending: Vec<OperationId>) {
        self.version += 1;
        self.last_sync = Some(at);
        self.pending_operation_ids = pending;
    }
}

/// Row counts per logical collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub keywords: u64,
    pub groups: u64,
    pub files: u64,
    pub pending_operations: u64,
    pub metadata: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_with_cluster_rederives_id() {
        let plain = KeywordRecord::new("seo audit", "tools", 100, 20.0, Utc::now());
        let clustered = plain.clone().with_cluster("audit");
        assert_ne!(plain.id, clustered.id);
        assert!(plain.has_canonical_id());
        assert!(clustered.has_canonical_id());
    }

    #[test]
    fn test_remote_keyword_into_record_matches_local_id() {
        let now = Utc::now();
        let local = KeywordRecord::new("Link Building", "Backlinks", 900, 55.5, now)
            .with_cluster("outreach")
            .with_source_file("links.csv");
        let remote = RemoteKeyword::from(local.clone());
        assert_eq!(remote.into_record(), local);
    }

    #[test]
    fn test_sync_metadata_advance() {
        let mut meta = SyncMetadata::new(Collection::Files);
        assert_eq!(meta.version, 0);
        let now = Utc::now();
        meta.advance(now, vec![]);
        meta.advance(now, vec![]);
        assert_eq!(meta.version, 2);
        assert_eq!(meta.last_sync, Some(now));
    }

    #[test]
    fn test_collection_serde_names() {
        let json = serde_json::to_string(&Collection::Keywords).expect("serialize");
        assert_eq!(json, "\"keywords\"");
        assert_eq!(Collection::Files.to_string(), "files");
    }
}
