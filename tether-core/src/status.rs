//! Sync status and cycle report types
//!
//! These are the read-only shapes handed to UI collaborators.

use crate::entities::Collection;
use crate::identity::Timestamp;
use serde::{Deserialize, Serialize};

/// Orchestrator state machine.
///
/// `Idle -> Syncing -> Idle`, or `Syncing -> Error -> Idle` when a cycle
/// fails before any phase begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Error(String),
}

/// Snapshot of orchestrator status for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_syncing: bool,
    pub last_sync_timestamp: Option<Timestamp>,
    pub pending_operation_count: u64,
    pub auto_sync_enabled: bool,
}

/// Aggregate result of one sync cycle.
///
/// Per-item failures land here instead of being returned as errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Outbox entries confirmed plus records merged from pulls.
    pub synced: u32,
    /// Outbox entries abandoned plus sub-collection pulls that failed.
    pub failed: u32,
    pub operations_confirmed: u32,
    pub operations_abandoned: u32,
    /// Entries that failed this cycle but stay queued for another attempt.
    pub operations_retrying: u32,
    pub collections_pulled: Vec<Collection>,
    pub collections_failed: Vec<Collection>,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Whether the cycle moved any state forward.
    ///
    /// Confirming or abandoning an outbox entry counts, as does any
    /// sub-collection pull that succeeded (even an empty snapshot).
    pub fn made_progress(&self) -> bool {
        self.operations_confirmed > 0
            || self.operations_abandoned > 0
            || !self.collections_pulled.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        self.synced > 0 && self.failed > 0
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The cycle ran; partial failures are listed in the report.
    Completed(SyncReport),
    /// Another cycle holds the sync flag. Nothing was started.
    AlreadyInProgress,
    /// The connectivity monitor reports the remote as unreachable.
    Offline,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::AlreadyInProgress | SyncOutcome::Offline => None,
        }
    }

    pub fn was_started(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

/// Notifications broadcast by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    CycleStarted { at: Timestamp },
    CycleCompleted { report: SyncReport },
    CycleFailed { message: String },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::CycleStarted { .. } => "cycle_started",
            SyncEvent::CycleCompleted { .. } => "cycle_completed",
            SyncEvent::CycleFailed { .. } => "cycle_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_made_no_progress() {
        assert!(!SyncReport::default().made_progress());
    }

    #[test]
    fn test_empty_snapshot_pull_counts_as_progress() {
        let report = SyncReport {
            collections_pulled: vec![Collection::Files],
            ..SyncReport::default()
        };
        assert!(report.made_progress());
        assert!(!report.is_partial());
    }

    #[test]
    fn test_partial_report() {
        let report = SyncReport {
            synced: 12,
            failed: 1,
            collections_pulled: vec![Collection::Groups, Collection::Keywords],
            collections_failed: vec![Collection::Files],
            ..SyncReport::default()
        };
        assert!(report.is_partial());
    }

    #[test]
    fn test_outcome_report_access() {
        assert!(SyncOutcome::AlreadyInProgress.report().is_none());
        assert!(!SyncOutcome::Offline.was_started());
        assert!(SyncOutcome::Completed(SyncReport::default()).was_started());
    }
}
