//! In-memory LocalStore implementation for testing.
//!
//! Collections live in BTreeMaps behind a single RwLock, so every call is
//! atomic with respect to the others. Clones share the same tables.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tether_core::{
    Collection, FileRecord, GroupAggregate, KeywordRecord, OperationId, OperationPayload,
    PendingOperation, StoreCounts, StoreError, SyncMetadata, TetherError, TetherResult,
};

use crate::index_key::KeywordIndex;
use crate::LocalStore;

#[derive(Debug, Default)]
struct Tables {
    keywords: BTreeMap<String, KeywordRecord>,
    groups: BTreeMap<String, GroupAggregate>,
    files: BTreeMap<String, FileRecord>,
    metadata: BTreeMap<Collection, SyncMetadata>,
    pending: BTreeMap<OperationId, PendingOperation>,
}

/// In-memory store for unit tests and development.
///
/// # Example
///
/// ```rust,ignore
/// use tether_storage::{LocalStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.keyword_put(&record).await?;
/// store.set_unavailable(true); // every call now fails
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> TetherResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TetherError::Store(StoreError::Unavailable {
                reason: "memory store marked unavailable".to_string(),
            }));
        }
        Ok(())
    }

    fn read(&self) -> TetherResult<RwLockReadGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| TetherError::Store(StoreError::LockPoisoned))
    }

    fn write(&self) -> TetherResult<RwLockWriteGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| TetherError::Store(StoreError::LockPoisoned))
    }
}

impl Tables {
    fn apply(&mut self, payload: &OperationPayload) {
        match payload {
            OperationPayload::CreateKeywords { records } => {
                for record in records {
                    self.keywords.insert(record.id.clone(), record.clone());
                }
            }
            OperationPayload::UpdateKeyword { record } => {
                self.keywords.insert(record.id.clone(), record.clone());
            }
            OperationPayload::DeleteKeyword { keyword_id, .. } => {
                self.keywords.remove(keyword_id);
            }
            OperationPayload::DeleteGroup { group_name } => {
                self.groups.remove(group_name);
            }
            OperationPayload::DeleteFile { filename } => {
                self.files.remove(filename);
            }
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn keyword_put(&self, record: &KeywordRecord) -> TetherResult<()> {
        self.write()?
            .keywords
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn keyword_bulk_put(&self, records: &[KeywordRecord]) -> TetherResult<usize> {
        let mut tables = self.write()?;
        for record in records {
            tables.keywords.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn keyword_get(&self, id: &str) -> TetherResult<Option<KeywordRecord>> {
        Ok(self.read()?.keywords.get(id).cloned())
    }

    async fn keyword_list(&self) -> TetherResult<Vec<KeywordRecord>> {
        Ok(self.read()?.keywords.values().cloned().collect())
    }

    async fn keyword_list_by_index(
        &self,
        index: KeywordIndex,
        value: &str,
    ) -> TetherResult<Vec<KeywordRecord>> {
        let tables = self.read()?;
        let matches = tables
            .keywords
            .values()
            .filter(|record| match index {
                KeywordIndex::Group => record.group_name == value,
                KeywordIndex::SourceFile => record.source_file.as_deref() == Some(value),
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn keyword_delete(&self, id: &str) -> TetherResult<bool> {
        Ok(self.write()?.keywords.remove(id).is_some())
    }

    async fn group_bulk_put(&self, groups: &[GroupAggregate]) -> TetherResult<usize> {
        let mut tables = self.write()?;
        for group in groups {
            tables.groups.insert(group.name.clone(), group.clone());
        }
        Ok(groups.len())
    }

    async fn group_get(&self, name: &str) -> TetherResult<Option<GroupAggregate>> {
        Ok(self.read()?.groups.get(name).cloned())
    }

    async fn group_list(&self) -> TetherResult<Vec<GroupAggregate>> {
        Ok(self.read()?.groups.values().cloned().collect())
    }

    async fn group_delete(&self, name: &str) -> TetherResult<bool> {
        Ok(self.write()?.groups.remove(name).is_some())
    }

    async fn file_bulk_put(&self, files: &[FileRecord]) -> TetherResult<usize> {
        let mut tables = self.write()?;
        for file in files {
            tables.files.insert(file.filename.clone(), file.clone());
        }
        Ok(files.len())
    }

    async fn file_get(&self, filename: &str) -> TetherResult<Option<FileRecord>> {
        Ok(self.read()?.files.get(filename).cloned())
    }

    async fn file_list(&self) -> TetherResult<Vec<FileRecord>> {
        Ok(self.read()?.files.values().cloned().collect())
    }

    async fn file_delete(&self, filename: &str) -> TetherResult<bool> {
        Ok(self.write()?.files.remove(filename).is_some())
    }

    async fn pending_add(&self, op: &PendingOperation) -> TetherResult<()> {
        self.write()?.pending.insert(op.id, op.clone());
        Ok(())
    }

    async fn pending_list(&self) -> TetherResult<Vec<PendingOperation>> {
        let mut ops: Vec<_> = self.read()?.pending.values().cloned().collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(ops)
    }

    async fn pending_update(&self, op: &PendingOperation) -> TetherResult<bool> {
        let mut tables = self.write()?;
        match tables.pending.get_mut(&op.id) {
            Some(existing) => {
                *existing = op.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_remove(&self, id: OperationId) -> TetherResult<bool> {
        Ok(self.write()?.pending.remove(&id).is_some())
    }

    async fn pending_count(&self) -> TetherResult<u64> {
        Ok(self.read()?.pending.len() as u64)
    }

    async fn apply_and_enqueue(&self, op: &PendingOperation) -> TetherResult<()> {
        let mut tables = self.write()?;
        tables.apply(&op.payload);
        tables.pending.insert(op.id, op.clone());
        Ok(())
    }

    async fn metadata_get(&self, collection: Collection) -> TetherResult<Option<SyncMetadata>> {
        Ok(self.read()?.metadata.get(&collection).cloned())
    }

    async fn metadata_put(&self, metadata: &SyncMetadata) -> TetherResult<()> {
        self.write()?
            .metadata
            .insert(metadata.collection, metadata.clone());
        Ok(())
    }

    async fn metadata_list(&self) -> TetherResult<Vec<SyncMetadata>> {
        Ok(self.read()?.metadata.values().cloned().collect())
    }

    async fn counts(&self) -> TetherResult<StoreCounts> {
        let tables = self.read()?;
        Ok(StoreCounts {
            keywords: tables.keywords.len() as u64,
            groups: tables.groups.len() as u64,
            files: tables.files.len() as u64,
            pending_operations: tables.pending.len() as u64,
            metadata: tables.metadata.len() as u64,
        })
    }

    async fn clear_all(&self) -> TetherResult<()> {
        *self.write()? = Tables::default();
        Ok(())
    }
}
