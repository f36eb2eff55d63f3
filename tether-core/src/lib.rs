//! Tether Core - Entity Types
//!
//! Records, operations, errors and configuration shared by the store, the
//! sync orchestrator and the connectivity monitor. This crate contains only
//! data types, their invariants and the remote service trait - no I/O.

pub mod config;
pub mod connectivity;
pub mod constants;
pub mod entities;
pub mod error;
pub mod identity;
pub mod operation;
pub mod remote;
pub mod status;

pub use config::{EngineConfig, MonitorConfig, RemoteConfig, StoreConfig, SyncConfig};
pub use connectivity::{
    ConnectivityState, ConnectivityStatus, EffectiveConnectionType, LinkEvent, LinkQuality,
    QueueDrainReport, QueueEntrySummary, QueueStatus,
};
pub use entities::{
    Collection, FileRecord, GroupAggregate, KeywordRecord, RemoteKeyword, StoreCounts,
    SyncMetadata,
};
pub use error::{ConfigError, RemoteError, RemoteResult, StoreError, TetherError, TetherResult};
pub use identity::{keyword_record_id, new_operation_id, normalize_identity, OperationId, Timestamp};
pub use operation::{OperationKind, OperationPayload, PendingOperation, QueuedOperation};
pub use remote::RemoteService;
pub use status::{SyncEvent, SyncOutcome, SyncReport, SyncState, SyncStatus};
