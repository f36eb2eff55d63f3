//! Connectivity and offline-queue status types

use crate::identity::{OperationId, Timestamp};
use crate::operation::OperationKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Effective reachability of the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

/// Connection type reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveConnectionType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl FromStr for EffectiveConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slow-2g" => Ok(Self::Slow2g),
            "2g" => Ok(Self::TwoG),
            "3g" => Ok(Self::ThreeG),
            "4g" => Ok(Self::FourG),
            other => Err(format!("unknown connection type: {other}")),
        }
    }
}

/// Coarse link-quality classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl LinkQuality {
    pub fn classify(connection: Option<EffectiveConnectionType>) -> Self {
        match connection {
            Some(EffectiveConnectionType::FourG) => LinkQuality::Good,
            Some(EffectiveConnectionType::ThreeG) => LinkQuality::Fair,
            Some(EffectiveConnectionType::TwoG | EffectiveConnectionType::Slow2g) => {
                LinkQuality::Poor
            }
            None => LinkQuality::Unknown,
        }
    }
}

/// Link-layer hint delivered by the host platform.
///
/// Hints only trigger a probe; they never flip the state on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up {
        connection: Option<EffectiveConnectionType>,
    },
    Down,
}

/// One offline-queue entry, as shown to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntrySummary {
    pub id: OperationId,
    pub name: String,
    pub kind: OperationKind,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: Timestamp,
}

/// Offline-queue depth and composition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub by_kind: BTreeMap<OperationKind, usize>,
    pub entries: Vec<QueueEntrySummary>,
}

/// Snapshot of connectivity for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityStatus {
    pub state: ConnectivityState,
    pub link_quality: LinkQuality,
    pub last_checked: Option<Timestamp>,
    pub queue_depth: usize,
    pub permanent_failures: u64,
}

/// Result of one offline-queue drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDrainReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub retrying: u32,
    pub dropped: u32,
    pub errors: Vec<String>,
    /// `true` when the pass did not run (offline or already draining).
    pub skipped: bool,
}

impl QueueDrainReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}
