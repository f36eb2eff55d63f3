//! Constants for Tether
//!
//! Default values used by the configuration types. Centralizing them keeps
//! the `Default` impls and the `from_env` fallbacks in agreement.

// ============================================================================
// SYNC ORCHESTRATOR
// ============================================================================

/// Default auto-sync interval in seconds.
pub const DEFAULT_AUTO_SYNC_INTERVAL_SECS: u64 = 30;

/// Default number of failed attempts before an outbox entry is abandoned.
pub const DEFAULT_SYNC_MAX_RETRIES: u32 = 3;

/// Delay between a local operation and the sync it triggers, in milliseconds.
pub const DEFAULT_LOCAL_CHANGE_DELAY_MS: u64 = 1000;

/// Capacity of the sync event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// ============================================================================
// CONNECTIVITY MONITOR
// ============================================================================

/// Default health-check poll interval in seconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 10;

/// Default offline-queue processing interval in seconds.
pub const DEFAULT_QUEUE_PROCESS_INTERVAL_SECS: u64 = 5;

/// Default timeout for a single health-check probe in seconds.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Default retry cap for offline-queue entries.
pub const DEFAULT_OFFLINE_MAX_RETRIES: u32 = 3;

// ============================================================================
// LOCAL STORE
// ============================================================================

/// Default on-disk location of the LMDB environment.
pub const DEFAULT_STORE_PATH: &str = "./tether-data";

/// Default LMDB map size in megabytes.
pub const DEFAULT_STORE_MAP_SIZE_MB: usize = 64;

/// Schema version written into every store.
pub const STORE_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// REMOTE SERVICE
// ============================================================================

/// Default remote base URL (development).
pub const DEFAULT_REMOTE_URL: &str = "http://localhost:8000/api";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
