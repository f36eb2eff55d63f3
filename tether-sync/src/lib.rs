//! Tether Sync - Orchestration and Connectivity
//!
//! Keeps the local store consistent with the remote data service across
//! intermittent connectivity:
//!
//! - [`SyncOrchestrator`] drains the outbox, then pulls authoritative
//!   snapshots. One cycle at a time.
//! - [`ConnectivityMonitor`] probes the remote, publishes online/offline
//!   transitions on a `watch` channel and drains the offline queue.
//! - [`SyncEngine`] builds both around a [`tether_storage::LocalStore`] and
//!   exposes the UI surface.
//! - [`HttpRemoteService`] is the JSON/HTTP implementation of
//!   [`tether_core::RemoteService`].

pub mod connectivity;
pub mod engine;
pub mod http;
pub mod orchestrator;
pub mod schedule;
pub mod telemetry;

pub use connectivity::ConnectivityMonitor;
pub use engine::SyncEngine;
pub use http::HttpRemoteService;
pub use orchestrator::SyncOrchestrator;
pub use schedule::ScheduledTask;
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
