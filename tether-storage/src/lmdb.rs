//! LMDB-backed local store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each logical collection is a
//! named database inside one environment, so a single write transaction can
//! span a record, its index rows and an outbox entry.
//!
//! # Layout
//!
//! | database | key | value |
//! |---|---|---|
//! | `keywords` | record id | JSON `KeywordRecord` |
//! | `keywords_by_group` | `IndexKey(group, id)` | empty |
//! | `keywords_by_file` | `IndexKey(filename, id)` | empty |
//! | `groups` | group name | JSON `GroupAggregate` |
//! | `files` | filename | JSON `FileRecord` |
//! | `sync_metadata` | collection name | JSON `SyncMetadata` |
//! | `pending_operations` | operation id (16 bytes) | JSON `PendingOperation` |
//! | `meta` | `schema_version` | u32 little-endian |

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{de::DeserializeOwned, Serialize};
use tether_core::constants::STORE_SCHEMA_VERSION;
use tether_core::{
    Collection, FileRecord, GroupAggregate, KeywordRecord, OperationId, OperationPayload,
    PendingOperation, StoreConfig, StoreCounts, StoreError, SyncMetadata, TetherError,
    TetherResult,
};

use crate::index_key::{IndexKey, KeywordIndex};
use crate::LocalStore;

const KEYWORDS_DB: &str = "keywords";
const KEYWORDS_BY_GROUP_DB: &str = "keywords_by_group";
const KEYWORDS_BY_FILE_DB: &str = "keywords_by_file";
const GROUPS_DB: &str = "groups";
const FILES_DB: &str = "files";
const METADATA_DB: &str = "sync_metadata";
const PENDING_DB: &str = "pending_operations";
const META_DB: &str = "meta";
const MAX_DBS: u32 = 8;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The environment was written by a different schema version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to TetherError.
impl From<LmdbStoreError> for TetherError {
    fn from(e: LmdbStoreError) -> Self {
        let store_error = match e {
            LmdbStoreError::EnvOpen(_) | LmdbStoreError::DbOpen(_) | LmdbStoreError::Io(_) => {
                StoreError::Unavailable {
                    reason: e.to_string(),
                }
            }
            LmdbStoreError::Transaction(reason) => StoreError::Transaction { reason },
            LmdbStoreError::Serialization(reason) | LmdbStoreError::Deserialization(reason) => {
                StoreError::Serialization { reason }
            }
            LmdbStoreError::SchemaMismatch { expected, found } => {
                StoreError::SchemaMismatch { expected, found }
            }
        };
        TetherError::Store(store_error)
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbStoreError> {
    serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Deserialization(e.to_string()))
}

fn get_json<T: DeserializeOwned>(
    db: &Database<Str, Bytes>,
    txn: &RoTxn<'_>,
    key: &str,
) -> Result<Option<T>, LmdbStoreError> {
    match db.get(txn, key).map_err(txn_err)? {
        Some(bytes) => Ok(Some(decode(bytes)?)),
        None => Ok(None),
    }
}

fn list_json<T: DeserializeOwned>(
    db: &Database<Str, Bytes>,
    txn: &RoTxn<'_>,
) -> Result<Vec<T>, LmdbStoreError> {
    let mut values = Vec::new();
    for item in db.iter(txn).map_err(txn_err)? {
        let (_, bytes) = item.map_err(txn_err)?;
        values.push(decode(bytes)?);
    }
    Ok(values)
}

/// LMDB-backed local store.
///
/// # Example
///
/// ```ignore
/// use tether_core::StoreConfig;
/// use tether_storage::{LmdbLocalStore, LocalStore};
///
/// let store = LmdbLocalStore::open(&StoreConfig::new("/tmp/tether"))?;
/// store.keyword_bulk_put(&records).await?;
/// let tools = store.keyword_list_by_index(KeywordIndex::Group, "tools").await?;
/// ```
pub struct LmdbLocalStore {
    env: Env,
    path: PathBuf,
    keywords: Database<Str, Bytes>,
    keywords_by_group: Database<Bytes, Bytes>,
    keywords_by_file: Database<Bytes, Bytes>,
    groups: Database<Str, Bytes>,
    files: Database<Str, Bytes>,
    metadata: Database<Str, Bytes>,
    pending: Database<Bytes, Bytes>,
    meta: Database<Str, Bytes>,
}

impl LmdbLocalStore {
    /// Open (or create) the store at `config.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - The LMDB environment or one of its databases cannot be opened
    /// - The environment was written with a different schema version
    pub fn open(config: &StoreConfig) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&config.path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size_mb * 1024 * 1024)
                .max_dbs(MAX_DBS)
                .open(&config.path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db_err = |e: heed::Error| LmdbStoreError::DbOpen(e.to_string());

        let keywords: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(KEYWORDS_DB))
            .map_err(db_err)?;
        let keywords_by_group: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(KEYWORDS_BY_GROUP_DB))
            .map_err(db_err)?;
        let keywords_by_file: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(KEYWORDS_BY_FILE_DB))
            .map_err(db_err)?;
        let groups: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(GROUPS_DB))
            .map_err(db_err)?;
        let files: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(FILES_DB))
            .map_err(db_err)?;
        let metadata: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(METADATA_DB))
            .map_err(db_err)?;
        let pending: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(PENDING_DB))
            .map_err(db_err)?;
        let meta: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(META_DB))
            .map_err(db_err)?;

        wtxn.commit().map_err(txn_err)?;

        let store = Self {
            env,
            path: config.path.clone(),
            keywords,
            keywords_by_group,
            keywords_by_file,
            groups,
            files,
            metadata,
            pending,
            meta,
        };
        store.ensure_schema_version()?;

        tracing::info!(path = %store.path.display(), "Local store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the environment and wait until LMDB has released it, so the
    /// same path can be reopened in this process.
    pub fn close(self) {
        let closing = self.env.prepare_for_closing();
        closing.wait();
    }

    /// Schema version recorded in the environment.
    pub fn schema_version(&self) -> Result<Option<u32>, LmdbStoreError> {
        self.read(|rtxn| self.read_schema_version(rtxn))
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&RoTxn<'_>) -> Result<T, LmdbStoreError>,
    ) -> Result<T, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        f(&rtxn)
    }

    /// Run `f` in a write transaction; commit only if it succeeds.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut RwTxn<'_>) -> Result<T, LmdbStoreError>,
    ) -> Result<T, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let value = f(&mut wtxn)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(value)
    }

    fn read_schema_version(&self, txn: &RoTxn<'_>) -> Result<Option<u32>, LmdbStoreError> {
        match self.meta.get(txn, SCHEMA_VERSION_KEY).map_err(txn_err)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| {
                    LmdbStoreError::Deserialization("Invalid schema version".into())
                })?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn ensure_schema_version(&self) -> Result<(), LmdbStoreError> {
        self.write(|wtxn| match self.read_schema_version(wtxn)? {
            None => self
                .meta
                .put(wtxn, SCHEMA_VERSION_KEY, &STORE_SCHEMA_VERSION.to_le_bytes())
                .map_err(txn_err),
            Some(found) if found == STORE_SCHEMA_VERSION => Ok(()),
            Some(found) => Err(LmdbStoreError::SchemaMismatch {
                expected: STORE_SCHEMA_VERSION,
                found,
            }),
        })
    }

    fn index_db(&self, index: KeywordIndex) -> &Database<Bytes, Bytes> {
        match index {
            KeywordIndex::Group => &self.keywords_by_group,
            KeywordIndex::SourceFile => &self.keywords_by_file,
        }
    }

    fn write_index_rows(
        &self,
        wtxn: &mut RwTxn<'_>,
        record: &KeywordRecord,
    ) -> Result<(), LmdbStoreError> {
        let group_key = IndexKey::new(&record.group_name, &record.id).encode();
        self.keywords_by_group
            .put(wtxn, &group_key, &[])
            .map_err(txn_err)?;
        if let Some(filename) = &record.source_file {
            let file_key = IndexKey::new(filename, &record.id).encode();
            self.keywords_by_file
                .put(wtxn, &file_key, &[])
                .map_err(txn_err)?;
        }
        Ok(())
    }

    fn delete_index_rows(
        &self,
        wtxn: &mut RwTxn<'_>,
        record: &KeywordRecord,
    ) -> Result<(), LmdbStoreError> {
        let group_key = IndexKey::new(&record.group_name, &record.id).encode();
        self.keywords_by_group
            .delete(wtxn, &group_key)
            .map_err(txn_err)?;
        if let Some(filename) = &record.source_file {
            let file_key = IndexKey::new(filename, &record.id).encode();
            self.keywords_by_file
                .delete(wtxn, &file_key)
                .map_err(txn_err)?;
        }
        Ok(())
    }

    fn put_keyword_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        record: &KeywordRecord,
    ) -> Result<(), LmdbStoreError> {
        let previous: Option<KeywordRecord> = get_json(&self.keywords, wtxn, &record.id)?;
        if let Some(previous) = previous {
            self.delete_index_rows(wtxn, &previous)?;
        }
        let bytes = encode(record)?;
        self.keywords
            .put(wtxn, record.id.as_str(), bytes.as_slice())
            .map_err(txn_err)?;
        self.write_index_rows(wtxn, record)
    }

    fn delete_keyword_in(&self, wtxn: &mut RwTxn<'_>, id: &str) -> Result<bool, LmdbStoreError> {
        let previous: Option<KeywordRecord> = get_json(&self.keywords, wtxn, id)?;
        match previous {
            Some(previous) => {
                self.delete_index_rows(wtxn, &previous)?;
                self.keywords.delete(wtxn, id).map_err(txn_err)
            }
            None => Ok(false),
        }
    }

    fn put_pending_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        op: &PendingOperation,
    ) -> Result<(), LmdbStoreError> {
        let bytes = encode(op)?;
        self.pending
            .put(wtxn, op.id.as_bytes().as_slice(), bytes.as_slice())
            .map_err(txn_err)
    }

    fn put_all<T: Serialize>(
        &self,
        db: &Database<Str, Bytes>,
        items: &[T],
        key: impl Fn(&T) -> &str,
    ) -> Result<usize, LmdbStoreError> {
        self.write(|wtxn| {
            for item in items {
                let bytes = encode(item)?;
                db.put(wtxn, key(item), bytes.as_slice()).map_err(txn_err)?;
            }
            Ok(items.len())
        })
    }

    fn scan_index(
        &self,
        index: KeywordIndex,
        value: &str,
    ) -> Result<Vec<KeywordRecord>, LmdbStoreError> {
        let prefix = IndexKey::prefix(value);
        self.read(|rtxn| {
            // Rows are sorted, so the prefix cursor stops at the first row
            // outside `value`.
            let mut ids = Vec::new();
            let rows = self
                .index_db(index)
                .prefix_iter(rtxn, prefix.as_slice())
                .map_err(txn_err)?;
            for item in rows {
                let (key, _) = item.map_err(txn_err)?;
                if let Some(index_key) = IndexKey::decode(key) {
                    ids.push(index_key.record_id().to_string());
                }
            }

            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(record) = get_json(&self.keywords, rtxn, &id)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }
}

#[async_trait]
impl LocalStore for LmdbLocalStore {
    async fn keyword_put(&self, record: &KeywordRecord) -> TetherResult<()> {
        Ok(self.write(|wtxn| self.put_keyword_in(wtxn, record))?)
    }

    async fn keyword_bulk_put(&self, records: &[KeywordRecord]) -> TetherResult<usize> {
        let written = self.write(|wtxn| {
            for record in records {
                self.put_keyword_in(wtxn, record)?;
            }
            Ok(records.len())
        })?;
        Ok(written)
    }

    async fn keyword_get(&self, id: &str) -> TetherResult<Option<KeywordRecord>> {
        Ok(self.read(|rtxn| get_json(&self.keywords, rtxn, id))?)
    }

    async fn keyword_list(&self) -> TetherResult<Vec<KeywordRecord>> {
        Ok(self.read(|rtxn| list_json(&self.keywords, rtxn))?)
    }

    async fn keyword_list_by_index(
        &self,
        index: KeywordIndex,
        value: &str,
    ) -> TetherResult<Vec<KeywordRecord>> {
        Ok(self.scan_index(index, value)?)
    }

    async fn keyword_delete(&self, id: &str) -> TetherResult<bool> {
        Ok(self.write(|wtxn| self.delete_keyword_in(wtxn, id))?)
    }

    async fn group_bulk_put(&self, groups: &[GroupAggregate]) -> TetherResult<usize> {
        Ok(self.put_all(&self.groups, groups, |g| g.name.as_str())?)
    }

    async fn group_get(&self, name: &str) -> TetherResult<Option<GroupAggregate>> {
        Ok(self.read(|rtxn| get_json(&self.groups, rtxn, name))?)
    }

    async fn group_list(&self) -> TetherResult<Vec<GroupAggregate>> {
        Ok(self.read(|rtxn| list_json(&self.groups, rtxn))?)
    }

    async fn group_delete(&self, name: &str) -> TetherResult<bool> {
        Ok(self.write(|wtxn| self.groups.delete(wtxn, name).map_err(txn_err))?)
    }

    async fn file_bulk_put(&self, files: &[FileRecord]) -> TetherResult<usize> {
        Ok(self.put_all(&self.files, files, |f| f.filename.as_str())?)
    }

    async fn file_get(&self, filename: &str) -> TetherResult<Option<FileRecord>> {
        Ok(self.read(|rtxn| get_json(&self.files, rtxn, filename))?)
    }

    async fn file_list(&self) -> TetherResult<Vec<FileRecord>> {
        Ok(self.read(|rtxn| list_json(&self.files, rtxn))?)
    }

    async fn file_delete(&self, filename: &str) -> TetherResult<bool> {
        Ok(self.write(|wtxn| self.files.delete(wtxn, filename).map_err(txn_err))?)
    }

    async fn pending_add(&self, op: &PendingOperation) -> TetherResult<()> {
        Ok(self.write(|wtxn| self.put_pending_in(wtxn, op))?)
    }

    async fn pending_list(&self) -> TetherResult<Vec<PendingOperation>> {
        let mut ops = self.read(|rtxn| {
            let mut ops: Vec<PendingOperation> = Vec::new();
            for item in self.pending.iter(rtxn).map_err(txn_err)? {
                let (_, bytes) = item.map_err(txn_err)?;
                ops.push(decode(bytes)?);
            }
            Ok(ops)
        })?;
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(ops)
    }

    async fn pending_update(&self, op: &PendingOperation) -> TetherResult<bool> {
        let updated = self.write(|wtxn| {
            let exists = self
                .pending
                .get(wtxn, op.id.as_bytes().as_slice())
                .map_err(txn_err)?
                .is_some();
            if exists {
                self.put_pending_in(wtxn, op)?;
            }
            Ok(exists)
        })?;
        Ok(updated)
    }

    async fn pending_remove(&self, id: OperationId) -> TetherResult<bool> {
        Ok(self.write(|wtxn| {
            self.pending
                .delete(wtxn, id.as_bytes().as_slice())
                .map_err(txn_err)
        })?)
    }

    async fn pending_count(&self) -> TetherResult<u64> {
        Ok(self.read(|rtxn| self.pending.len(rtxn).map_err(txn_err))?)
    }

    async fn apply_and_enqueue(&self, op: &PendingOperation) -> TetherResult<()> {
        self.write(|wtxn| {
            match &op.payload {
                OperationPayload::CreateKeywords { records } => {
                    for record in records {
                        self.put_keyword_in(wtxn, record)?;
                    }
                }
                OperationPayload::UpdateKeyword { record } => {
                    self.put_keyword_in(wtxn, record)?;
                }
                OperationPayload::DeleteKeyword { keyword_id, .. } => {
                    self.delete_keyword_in(wtxn, keyword_id)?;
                }
                OperationPayload::DeleteGroup { group_name } => {
                    self.groups.delete(wtxn, group_name).map_err(txn_err)?;
                }
                OperationPayload::DeleteFile { filename } => {
                    self.files.delete(wtxn, filename).map_err(txn_err)?;
                }
            }
            self.put_pending_in(wtxn, op)
        })?;
        Ok(())
    }

    async fn metadata_get(&self, collection: Collection) -> TetherResult<Option<SyncMetadata>> {
        Ok(self.read(|rtxn| get_json(&self.metadata, rtxn, collection.as_str()))?)
    }

    async fn metadata_put(&self, metadata: &SyncMetadata) -> TetherResult<()> {
        self.put_all(
            &self.metadata,
            std::slice::from_ref(metadata),
            |m| m.collection.as_str(),
        )?;
        Ok(())
    }

    async fn metadata_list(&self) -> TetherResult<Vec<SyncMetadata>> {
        Ok(self.read(|rtxn| list_json(&self.metadata, rtxn))?)
    }

    async fn counts(&self) -> TetherResult<StoreCounts> {
        Ok(self.read(|rtxn| {
            Ok(StoreCounts {
                keywords: self.keywords.len(rtxn).map_err(txn_err)?,
                groups: self.groups.len(rtxn).map_err(txn_err)?,
                files: self.files.len(rtxn).map_err(txn_err)?,
                pending_operations: self.pending.len(rtxn).map_err(txn_err)?,
                metadata: self.metadata.len(rtxn).map_err(txn_err)?,
            })
        })?)
    }

    async fn clear_all(&self) -> TetherResult<()> {
        self.write(|wtxn| {
            self.keywords.clear(wtxn).map_err(txn_err)?;
            self.keywords_by_group.clear(wtxn).map_err(txn_err)?;
            self.keywords_by_file.clear(wtxn).map_err(txn_err)?;
            self.groups.clear(wtxn).map_err(txn_err)?;
            self.files.clear(wtxn).map_err(txn_err)?;
            self.metadata.clear(wtxn).map_err(txn_err)?;
            self.pending.clear(wtxn).map_err(txn_err)
        })?;
        tracing::info!(path = %self.path.display(), "Local store cleared");
        Ok(())
    }
}
