//! Remote service boundary
//!
//! The authoritative data service is only ever reached through this trait.
//! The HTTP implementation lives in `tether-sync`; tests use a scripted mock.

use crate::entities::{FileRecord, GroupAggregate, KeywordRecord, RemoteKeyword};
use crate::error::RemoteResult;
use crate::operation::OperationPayload;

/// Trait for the remote data service.
///
/// Mutations return the service's `success` flag: `Ok(false)` means the
/// request reached the service and was refused, which the callers count as
/// a failed attempt exactly like an `Err`.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch the full group snapshot.
    async fn fetch_groups(&self) -> RemoteResult<Vec<GroupAggregate>>;

    /// Fetch the full keyword snapshot.
    async fn fetch_keywords(&self) -> RemoteResult<Vec<RemoteKeyword>>;

    /// Fetch the full file snapshot.
    async fn fetch_files(&self) -> RemoteResult<Vec<FileRecord>>;

    async fn create_keywords(&self, records: &[KeywordRecord]) -> RemoteResult<bool>;

    async fn update_keyword(&self, record: &KeywordRecord) -> RemoteResult<bool>;

    async fn remove_keyword(&self, keyword_id: &str, group_name: &str) -> RemoteResult<bool>;

    async fn remove_group(&self, group_name: &str) -> RemoteResult<bool>;

    async fn remove_file(&self, filename: &str) -> RemoteResult<bool>;

    /// Cheap reachability probe. `Ok(true)` means the service is healthy.
    async fn health_check(&self) -> RemoteResult<bool>;

    /// Replay an operation payload against the matching endpoint.
    async fn execute(&self, payload: &OperationPayload) -> RemoteResult<bool> {
        match payload {
            OperationPayload::CreateKeywords { records } => self.create_keywords(records).await,
            OperationPayload::UpdateKeyword { record } => self.update_keyword(record).await,
            OperationPayload::DeleteKeyword {
                keyword_id,
                group_name,
            } => self.remove_keyword(keyword_id, group_name).await,
            OperationPayload::DeleteGroup { group_name } => self.remove_group(group_name).await,
            OperationPayload::DeleteFile { filename } => self.remove_file(filename).await,
        }
    }
}
