//! Configuration types
//!
//! Each component takes its own config struct. Values come from `Default`,
//! from environment variables via `from_env()`, or from the short-interval
//! `development()` presets used by tests.

use crate::constants::*;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn require_nonzero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", value),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// SYNC ORCHESTRATOR
// ============================================================================

/// Configuration for the sync orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// How often auto-sync runs a full cycle (default: 30 seconds)
    pub auto_sync_interval: Duration,

    /// Whether auto-sync starts enabled on `init()` (default: true)
    pub auto_sync_enabled: bool,

    /// Failed attempts before an outbox entry is abandoned (default: 3)
    pub max_retries: u32,

    /// Delay before the sync kicked off by a local operation (default: 1s)
    pub local_change_delay: Duration,

    /// Sync event channel capacity
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval: Duration::from_secs(DEFAULT_AUTO_SYNC_INTERVAL_SECS),
            auto_sync_enabled: true,
            max_retries: DEFAULT_SYNC_MAX_RETRIES,
            local_change_delay: Duration::from_millis(DEFAULT_LOCAL_CHANGE_DELAY_MS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Create SyncConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TETHER_AUTO_SYNC_INTERVAL_SECS`: Auto-sync interval (default: 30)
    /// - `TETHER_AUTO_SYNC`: Start with auto-sync enabled (default: true)
    /// - `TETHER_SYNC_MAX_RETRIES`: Outbox retry cap (default: 3)
    /// - `TETHER_LOCAL_CHANGE_DELAY_MS`: Delay before a local-change sync (default: 1000)
    pub fn from_env() -> Self {
        Self {
            auto_sync_interval: Duration::from_secs(env_or(
                "TETHER_AUTO_SYNC_INTERVAL_SECS",
                DEFAULT_AUTO_SYNC_INTERVAL_SECS,
            )),
            auto_sync_enabled: env_flag("TETHER_AUTO_SYNC", true),
            max_retries: env_or("TETHER_SYNC_MAX_RETRIES", DEFAULT_SYNC_MAX_RETRIES),
            local_change_delay: Duration::from_millis(env_or(
                "TETHER_LOCAL_CHANGE_DELAY_MS",
                DEFAULT_LOCAL_CHANGE_DELAY_MS,
            )),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Short intervals for development and tests. Auto-sync starts disabled.
    pub fn development() -> Self {
        Self {
            auto_sync_interval: Duration::from_millis(200),
            auto_sync_enabled: false,
            max_retries: DEFAULT_SYNC_MAX_RETRIES,
            local_change_delay: Duration::from_millis(20),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("auto_sync_interval", self.auto_sync_interval)?;
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CONNECTIVITY MONITOR
// ============================================================================

/// Configuration for the connectivity monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Health-check poll interval (default: 10 seconds)
    pub health_check_interval: Duration,

    /// Offline-queue processing interval (default: 5 seconds)
    pub queue_process_interval: Duration,

    /// Timeout for a single health-check probe (default: 5 seconds)
    pub health_check_timeout: Duration,

    /// Retry cap used when a caller does not pick one (default: 3)
    pub default_max_retries: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            queue_process_interval: Duration::from_secs(DEFAULT_QUEUE_PROCESS_INTERVAL_SECS),
            health_check_timeout: Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
            default_max_retries: DEFAULT_OFFLINE_MAX_RETRIES,
        }
    }
}

impl MonitorConfig {
    /// Create MonitorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TETHER_HEALTH_CHECK_INTERVAL_SECS` (default: 10)
    /// - `TETHER_QUEUE_PROCESS_INTERVAL_SECS` (default: 5)
    /// - `TETHER_HEALTH_CHECK_TIMEOUT_SECS` (default: 5)
    /// - `TETHER_OFFLINE_MAX_RETRIES` (default: 3)
    pub fn from_env() -> Self {
        Self {
            health_check_interval: Duration::from_secs(env_or(
                "TETHER_HEALTH_CHECK_INTERVAL_SECS",
                DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            )),
            queue_process_interval: Duration::from_secs(env_or(
                "TETHER_QUEUE_PROCESS_INTERVAL_SECS",
                DEFAULT_QUEUE_PROCESS_INTERVAL_SECS,
            )),
            health_check_timeout: Duration::from_secs(env_or(
                "TETHER_HEALTH_CHECK_TIMEOUT_SECS",
                DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
            )),
            default_max_retries: env_or("TETHER_OFFLINE_MAX_RETRIES", DEFAULT_OFFLINE_MAX_RETRIES),
        }
    }

    /// Short intervals for development and tests.
    pub fn development() -> Self {
        Self {
            health_check_interval: Duration::from_millis(100),
            queue_process_interval: Duration::from_millis(50),
            health_check_timeout: Duration::from_millis(200),
            default_max_retries: DEFAULT_OFFLINE_MAX_RETRIES,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("health_check_interval", self.health_check_interval)?;
        require_nonzero("queue_process_interval", self.queue_process_interval)?;
        require_nonzero("health_check_timeout", self.health_check_timeout)
    }
}

// ============================================================================
// LOCAL STORE
// ============================================================================

/// Configuration for the LMDB-backed local store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the LMDB environment
    pub path: PathBuf,

    /// Maximum map size in megabytes
    pub map_size_mb: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            map_size_mb: DEFAULT_STORE_MAP_SIZE_MB,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create StoreConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TETHER_STORE_PATH` (default: ./tether-data)
    /// - `TETHER_STORE_MAP_SIZE_MB` (default: 64)
    pub fn from_env() -> Self {
        Self {
            path: std::env::var("TETHER_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH)),
            map_size_mb: env_or("TETHER_STORE_MAP_SIZE_MB", DEFAULT_STORE_MAP_SIZE_MB),
        }
    }
}

// ============================================================================
// REMOTE SERVICE
// ============================================================================

/// Configuration for the HTTP remote client.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// Timeout applied to every request (default: 10 seconds)
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl RemoteConfig {
    /// Create RemoteConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TETHER_REMOTE_URL` (default: http://localhost:8000/api)
    /// - `TETHER_REQUEST_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TETHER_REMOTE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_REMOTE_URL.to_string()),
            request_timeout: Duration::from_secs(env_or(
                "TETHER_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.clone(),
                reason: "must be an http(s) url".to_string(),
            });
        }
        require_nonzero("request_timeout", self.request_timeout)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Everything needed to assemble a sync engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub monitor: MonitorConfig,
    pub remote: RemoteConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            sync: SyncConfig::from_env(),
            monitor: MonitorConfig::from_env(),
            remote: RemoteConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()?;
        self.monitor.validate()?;
        self.remote.validate()
    }
}
