//! Outbox and offline-queue operations.
//!
//! Every mutation that has to reach the remote service is described by an
//! [`OperationPayload`] variant. The kind and target collection are derived
//! from the variant, so a payload can never claim to be a delete while
//! carrying update parameters.

use crate::entities::{Collection, KeywordRecord};
use crate::identity::{new_operation_id, OperationId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Typed operation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateKeywords { records: Vec<KeywordRecord> },
    UpdateKeyword { record: KeywordRecord },
    DeleteKeyword { keyword_id: String, group_name: String },
    DeleteGroup { group_name: String },
    DeleteFile { filename: String },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::CreateKeywords { .. } => OperationKind::Create,
            OperationPayload::UpdateKeyword { .. } => OperationKind::Update,
            OperationPayload::DeleteKeyword { .. }
            | OperationPayload::DeleteGroup { .. }
            | OperationPayload::DeleteFile { .. } => OperationKind::Delete,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            OperationPayload::CreateKeywords { .. }
            | OperationPayload::UpdateKeyword { .. }
            | OperationPayload::DeleteKeyword { .. } => Collection::Keywords,
            OperationPayload::DeleteGroup { .. } => Collection::Groups,
            OperationPayload::DeleteFile { .. } => Collection::Files,
        }
    }

    /// Stable name used in logs and queue composition reports.
    pub fn name(&self) -> &'static str {
        match self {
            OperationPayload::CreateKeywords { .. } => "create_keywords",
            OperationPayload::UpdateKeyword { .. } => "update_keyword",
            OperationPayload::DeleteKeyword { .. } => "delete_keyword",
            OperationPayload::DeleteGroup { .. } => "delete_group",
            OperationPayload::DeleteFile { .. } => "delete_file",
        }
    }
}

/// An outbox entry: a local mutation not yet confirmed remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub payload: OperationPayload,
    pub created_at: Timestamp,
    pub retry_count: u32,
}

impl PendingOperation {
    pub fn new(payload: OperationPayload) -> Self {
        Self {
            id: new_operation_id(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn collection(&self) -> Collection {
        self.payload.collection()
    }

    /// Record one more failed attempt. Returns `true` once `max_retries`
    /// attempts have failed and the entry must be abandoned.
    pub fn record_failure(&mut self, max_retries: u32) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count >= max_retries
    }
}

/// An entry of the connectivity monitor's offline queue.
///
/// Unlike outbox entries these carry their own retry cap, since they belong
/// to a specific user action rather than to store-level consistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: OperationId,
    pub payload: OperationPayload,
    pub enqueued_at: Timestamp,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedOperation {
    pub fn new(payload: OperationPayload, max_retries: u32) -> Self {
        Self {
            id: new_operation_id(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries,
        }
    }

    /// Same discipline as [`PendingOperation::record_failure`].
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count >= self.max_retries
    }
}
