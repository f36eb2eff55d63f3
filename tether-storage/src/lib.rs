//! Tether Storage - Local Store Trait and Implementations
//!
//! Defines the durable, indexed store behind the sync engine. The store owns
//! five logical collections: keyword records, group aggregates, file
//! records, sync metadata and the pending-operation outbox.
//!
//! The store has no network awareness and never retries: a failed read or
//! write is returned to the caller as [`tether_core::StoreError`].

pub mod index_key;
pub mod lmdb;
pub mod memory;

pub use index_key::{IndexKey, KeywordIndex};
pub use lmdb::{LmdbLocalStore, LmdbStoreError};
pub use memory::MemoryStore;

use async_trait::async_trait;
use tether_core::{
    Collection, FileRecord, GroupAggregate, KeywordRecord, OperationId, PendingOperation,
    StoreCounts, SyncMetadata, TetherResult,
};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Durable local store for synchronized records.
///
/// Every write is committed before the returned future resolves. Upserts
/// overwrite on conflict and never fail because a key already exists.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // ========================================================================
    // KEYWORD OPERATIONS
    // ========================================================================

    /// Upsert a keyword record, rewriting its index rows.
    async fn keyword_put(&self, record: &KeywordRecord) -> TetherResult<()>;

    /// Upsert many keyword records in one transaction. Returns how many were written.
    async fn keyword_bulk_put(&self, records: &[KeywordRecord]) -> TetherResult<usize>;

    /// Get a keyword record by id.
    async fn keyword_get(&self, id: &str) -> TetherResult<Option<KeywordRecord>>;

    /// List every keyword record.
    async fn keyword_list(&self) -> TetherResult<Vec<KeywordRecord>>;

    /// List keyword records whose indexed field equals `value`.
    async fn keyword_list_by_index(
        &self,
        index: KeywordIndex,
        value: &str,
    ) -> TetherResult<Vec<KeywordRecord>>;

    /// Delete a keyword record. Group and file aggregates are left alone.
    async fn keyword_delete(&self, id: &str) -> TetherResult<bool>;

    // ========================================================================
    // GROUP OPERATIONS
    // ========================================================================

    /// Upsert group aggregates by name.
    async fn group_bulk_put(&self, groups: &[GroupAggregate]) -> TetherResult<usize>;

    async fn group_get(&self, name: &str) -> TetherResult<Option<GroupAggregate>>;

    async fn group_list(&self) -> TetherResult<Vec<GroupAggregate>>;

    async fn group_delete(&self, name: &str) -> TetherResult<bool>;

    // ========================================================================
    // FILE OPERATIONS
    // ========================================================================

    /// Upsert file records by filename.
    async fn file_bulk_put(&self, files: &[FileRecord]) -> TetherResult<usize>;

    async fn file_get(&self, filename: &str) -> TetherResult<Option<FileRecord>>;

    async fn file_list(&self) -> TetherResult<Vec<FileRecord>>;

    async fn file_delete(&self, filename: &str) -> TetherResult<bool>;

    // ========================================================================
    // OUTBOX OPERATIONS
    // ========================================================================

    /// Append an entry to the outbox.
    async fn pending_add(&self, op: &PendingOperation) -> TetherResult<()>;

    /// List outbox entries, oldest first.
    async fn pending_list(&self) -> TetherResult<Vec<PendingOperation>>;

    /// Persist a changed entry (retry counter). Returns `false` when the
    /// entry no longer exists, in which case nothing is written.
    async fn pending_update(&self, op: &PendingOperation) -> TetherResult<bool>;

    /// Remove an entry. Returns whether it existed.
    async fn pending_remove(&self, id: OperationId) -> TetherResult<bool>;

    async fn pending_count(&self) -> TetherResult<u64>;

    /// Apply the payload's local effect and append the outbox entry as one
    /// unit. If this fails, neither change is visible.
    async fn apply_and_enqueue(&self, op: &PendingOperation) -> TetherResult<()>;

    // ========================================================================
    // SYNC METADATA
    // ========================================================================

    async fn metadata_get(&self, collection: Collection) -> TetherResult<Option<SyncMetadata>>;

    async fn metadata_put(&self, metadata: &SyncMetadata) -> TetherResult<()>;

    async fn metadata_list(&self) -> TetherResult<Vec<SyncMetadata>>;

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Row counts per collection.
    async fn counts(&self) -> TetherResult<StoreCounts>;

    /// Wipe every collection, outbox included.
    async fn clear_all(&self) -> TetherResult<()>;
}
