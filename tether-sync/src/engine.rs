//! Sync Engine facade
//!
//! The one long-lived object an application builds at start-up. It owns the
//! local store, the connectivity monitor and the orchestrator, wires the
//! connectivity channel into the orchestrator, and exposes the surface the
//! UI reads from.

use std::sync::Arc;
use tether_core::{
    ConnectivityStatus, EngineConfig, FileRecord, GroupAggregate, KeywordRecord, LinkEvent,
    LinkQuality, OperationPayload, PendingOperation, QueueStatus, RemoteService, SyncEvent,
    SyncOutcome, SyncStatus, TetherResult,
};
use tether_storage::{KeywordIndex, LmdbLocalStore, LocalStore};
use tokio::sync::broadcast;

use crate::connectivity::ConnectivityMonitor;
use crate::http::HttpRemoteService;
use crate::orchestrator::SyncOrchestrator;

/// Owns every sync component and hands out `Arc` handles to them.
///
/// # Example
///
/// ```ignore
/// use tether_core::EngineConfig;
/// use tether_sync::SyncEngine;
///
/// let engine = SyncEngine::connect(&EngineConfig::from_env())?;
/// engine.init().await;
/// let status = engine.sync_status().await?;
/// engine.dispose().await;
/// ```
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    monitor: Arc<ConnectivityMonitor>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncEngine {
    /// Open the LMDB store and talk to the remote over HTTP.
    pub fn connect(config: &EngineConfig) -> TetherResult<Self> {
        let remote = Arc::new(HttpRemoteService::new(&config.remote)?);
        Self::open(config, remote)
    }

    /// Open the LMDB store at `config.store.path` with the given remote.
    pub fn open(config: &EngineConfig, remote: Arc<dyn RemoteService>) -> TetherResult<Self> {
        config.validate()?;
        let store = Arc::new(LmdbLocalStore::open(&config.store)?);
        Self::with_store(config, store, remote)
    }

    /// Assemble an engine around an existing store.
    ///
    /// # Errors
    ///
    /// Fails if the sync or monitor config does not validate.
    pub fn with_store(
        config: &EngineConfig,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteService>,
    ) -> TetherResult<Self> {
        config.validate()?;
        let monitor = ConnectivityMonitor::new(Arc::clone(&remote), config.monitor.clone())?;
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&store),
            remote,
            config.sync.clone(),
            monitor.subscribe(),
        )?;
        Ok(Self {
            store,
            monitor,
            orchestrator,
        })
    }

    /// Start the monitor first so the orchestrator sees a probed state.
    pub async fn init(&self) {
        self.monitor.init().await;
        self.orchestrator.init();
        tracing::info!("Sync engine initialized");
    }

    pub async fn dispose(&self) {
        self.orchestrator.dispose().await;
        self.monitor.dispose().await;
        tracing::info!("Sync engine disposed");
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    // ========================================================================
    // UI SURFACE
    // ========================================================================

    pub async fn sync_status(&self) -> TetherResult<SyncStatus> {
        self.orchestrator.status().await
    }

    pub fn connectivity_status(&self) -> ConnectivityStatus {
        self.monitor.status()
    }

    pub fn link_quality(&self) -> LinkQuality {
        self.monitor.link_quality()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.monitor.queue_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.orchestrator.subscribe()
    }

    pub async fn perform_sync(&self) -> TetherResult<SyncOutcome> {
        self.orchestrator.perform_full_sync().await
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.orchestrator.set_auto_sync(enabled);
    }

    pub async fn notify_link_event(&self, event: LinkEvent) {
        self.monitor.notify_link_event(event).await;
    }

    pub async fn queue_local_operation(
        &self,
        payload: OperationPayload,
    ) -> TetherResult<PendingOperation> {
        self.orchestrator.add_local_operation(payload).await
    }

    /// Wipe every local collection, the outbox and the offline queue.
    pub async fn clear_all_local_data(&self) -> TetherResult<()> {
        self.store.clear_all().await?;
        let dropped = self.monitor.clear_queue();
        tracing::info!(offline_queue_dropped = dropped, "Local data cleared");
        Ok(())
    }

    pub async fn delete_record_locally(&self, keyword_id: &str) -> TetherResult<bool> {
        self.orchestrator.delete_keyword_locally(keyword_id).await
    }

    pub async fn keywords(&self) -> TetherResult<Vec<KeywordRecord>> {
        self.store.keyword_list().await
    }

    pub async fn groups(&self) -> TetherResult<Vec<GroupAggregate>> {
        self.store.group_list().await
    }

    pub async fn files(&self) -> TetherResult<Vec<FileRecord>> {
        self.store.file_list().await
    }

    pub async fn keywords_in_group(&self, group_name: &str) -> TetherResult<Vec<KeywordRecord>> {
        self.store
            .keyword_list_by_index(KeywordIndex::Group, group_name)
            .await
    }

    pub async fn keywords_from_file(&self, filename: &str) -> TetherResult<Vec<KeywordRecord>> {
        self.store
            .keyword_list_by_index(KeywordIndex::SourceFile, filename)
            .await
    }
}
