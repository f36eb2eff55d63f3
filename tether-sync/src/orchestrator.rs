//! Sync Orchestrator
//!
//! Runs one full bidirectional cycle at a time: drain the outbox toward the
//! remote service, then pull authoritative snapshots and merge them into the
//! local store.
//!
//! # Cycle
//!
//! 1. If the connectivity channel reports offline, return
//!    [`SyncOutcome::Offline`] without touching the outbox.
//! 2. Take the busy flag, or return [`SyncOutcome::AlreadyInProgress`].
//! 3. Drain: replay each outbox entry, oldest first. Success removes it; a
//!    failure bumps its retry counter, and an entry that reaches the cap is
//!    removed and reported once.
//! 4. Pull groups, keywords and files independently.
//! 5. If anything moved forward, advance the per-collection metadata rows
//!    and the last-sync timestamp.
//!
//! Per-item failures land in the [`SyncReport`]. Only a failure before the
//! drain starts (the outbox cannot be read) is returned as an error; the
//! state then reads `Error` until the next cycle.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tether_core::{
    Collection, ConnectivityState, KeywordRecord, OperationPayload, PendingOperation,
    RemoteKeyword, RemoteService, SyncConfig, SyncEvent, SyncMetadata, SyncOutcome, SyncReport,
    SyncState, SyncStatus, TetherResult, Timestamp,
};
use tether_storage::LocalStore;
use tokio::sync::{broadcast, watch};

use crate::schedule::{BusyGuard, ScheduledTask};

/// Background tasks owned by the orchestrator.
#[derive(Default)]
struct Tasks {
    auto_sync: Option<ScheduledTask>,
    connectivity_listener: Option<ScheduledTask>,
    kick: Option<ScheduledTask>,
}

/// Coordinates outbox drains and snapshot pulls.
///
/// Constructed once per engine and shared as `Arc<SyncOrchestrator>`.
pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteService>,
    config: SyncConfig,
    connectivity: watch::Receiver<ConnectivityState>,
    syncing: AtomicBool,
    state: watch::Sender<SyncState>,
    last_sync: Mutex<Option<Timestamp>>,
    auto_sync_enabled: AtomicBool,
    kick_pending: AtomicBool,
    disposed: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    tasks: Mutex<Tasks>,
    self_ref: Weak<SyncOrchestrator>,
}

impl SyncOrchestrator {
    /// Create an orchestrator gated by `connectivity`.
    ///
    /// Background tasks are not started until [`SyncOrchestrator::init`].
    ///
    /// # Errors
    ///
    /// Rejects a config with a zero interval, retry cap or event capacity.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteService>,
        config: SyncConfig,
        connectivity: watch::Receiver<ConnectivityState>,
    ) -> TetherResult<Arc<Self>> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let (state, _) = watch::channel(SyncState::Idle);
        Ok(Arc::new_cyclic(|self_ref| Self {
            store,
            remote,
            auto_sync_enabled: AtomicBool::new(config.auto_sync_enabled),
            config,
            connectivity,
            syncing: AtomicBool::new(false),
            state,
            last_sync: Mutex::new(None),
            kick_pending: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            events,
            tasks: Mutex::new(Tasks::default()),
            self_ref: self_ref.clone(),
        }))
    }

    /// Start the connectivity listener and, if enabled, the auto-sync timer.
    pub fn init(&self) {
        self.disposed.store(false, Ordering::SeqCst);
        {
            let mut tasks = self.tasks();
            if tasks.connectivity_listener.is_none() {
                tasks.connectivity_listener = Some(self.spawn_connectivity_listener());
            }
        }
        if self.auto_sync_enabled() {
            self.start_auto_sync();
        }
        tracing::info!(
            auto_sync = self.auto_sync_enabled(),
            interval_secs = self.config.auto_sync_interval.as_secs(),
            "Sync orchestrator initialized"
        );
    }

    /// Stop every task the orchestrator owns and wait for them.
    ///
    /// A cycle already running is allowed to finish; a kick still waiting
    /// out its delay is cancelled.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let (auto_sync, listener, kick) = {
            let mut tasks = self.tasks();
            (
                tasks.auto_sync.take(),
                tasks.connectivity_listener.take(),
                tasks.kick.take(),
            )
        };
        for task in [auto_sync, listener, kick].into_iter().flatten() {
            task.stop().await;
        }
        self.kick_pending.store(false, Ordering::SeqCst);
        tracing::info!("Sync orchestrator disposed");
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn last_sync_timestamp(&self) -> Option<Timestamp> {
        *self.last_sync_guard()
    }

    pub fn auto_sync_enabled(&self) -> bool {
        self.auto_sync_enabled.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> TetherResult<SyncStatus> {
        let pending_operation_count = self.store.pending_count().await?;
        Ok(SyncStatus {
            state: self.state(),
            is_syncing: self.is_syncing(),
            last_sync_timestamp: self.last_sync_timestamp(),
            pending_operation_count,
            auto_sync_enabled: self.auto_sync_enabled(),
        })
    }

    /// Subscribe to cycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // LOCAL MUTATIONS
    // ========================================================================

    /// Append an operation to the outbox and schedule a short-delay sync.
    pub async fn add_local_operation(
        &self,
        payload: OperationPayload,
    ) -> TetherResult<PendingOperation> {
        let op = PendingOperation::new(payload);
        self.store.pending_add(&op).await?;
        tracing::debug!(
            operation_id = %op.id,
            operation = op.payload.name(),
            "Local operation queued"
        );
        self.schedule_kick();
        Ok(op)
    }

    /// Delete a keyword locally and queue the remote delete in the same
    /// transaction. Returns `false` if no such keyword is stored.
    pub async fn delete_keyword_locally(&self, keyword_id: &str) -> TetherResult<bool> {
        let Some(record) = self.store.keyword_get(keyword_id).await? else {
            tracing::debug!(keyword_id, "Keyword not found, nothing to delete");
            return Ok(false);
        };

        let op = PendingOperation::new(OperationPayload::DeleteKeyword {
            keyword_id: record.id,
            group_name: record.group_name,
        });
        self.store.apply_and_enqueue(&op).await?;
        tracing::debug!(operation_id = %op.id, keyword_id, "Keyword deleted locally");
        self.schedule_kick();
        Ok(true)
    }

    // ========================================================================
    // AUTO SYNC
    // ========================================================================

    /// Start or stop the recurring sync timer.
    ///
    /// Disabling stops future ticks; a cycle already running finishes.
    pub fn set_auto_sync(&self, enabled: bool) {
        self.auto_sync_enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.start_auto_sync();
        } else {
            let task = self.tasks().auto_sync.take();
            drop(task);
        }
        tracing::info!(enabled, "Auto sync toggled");
    }

    fn start_auto_sync(&self) {
        let mut tasks = self.tasks();
        if tasks.auto_sync.as_ref().is_some_and(ScheduledTask::is_running) {
            return;
        }
        let weak = self.self_ref.clone();
        tasks.auto_sync = Some(ScheduledTask::every(
            "auto_sync",
            self.config.auto_sync_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.auto_sync_tick().await;
                    }
                }
            },
        ));
    }

    async fn auto_sync_tick(&self) {
        if self.is_syncing() || !self.is_online() {
            tracing::trace!(
                syncing = self.is_syncing(),
                online = self.is_online(),
                "Auto sync tick skipped"
            );
            return;
        }
        if let Err(e) = self.perform_full_sync().await {
            tracing::warn!(error = %e, "Auto sync cycle failed");
        }
    }

    /// Schedule a sync shortly after a local change. Pending kicks coalesce.
    fn schedule_kick(&self) {
        if !self.auto_sync_enabled() || self.is_syncing() || self.disposed.load(Ordering::SeqCst)
        {
            return;
        }
        if self.kick_pending.swap(true, Ordering::SeqCst) {
            tracing::trace!("Sync kick already pending");
            return;
        }

        let weak = self.self_ref.clone();
        let delay = self.config.local_change_delay;
        let kick = ScheduledTask::spawn("sync_kick", move |mut shutdown_rx| async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    tracing::trace!("Sync kick cancelled");
                    return;
                }
            }
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.kick_pending.store(false, Ordering::SeqCst);
            if this.disposed.load(Ordering::SeqCst) {
                return;
            }
            match this.perform_full_sync().await {
                Ok(outcome) => {
                    tracing::debug!(started = outcome.was_started(), "Local change sync finished")
                }
                Err(e) => tracing::warn!(error = %e, "Local change sync failed"),
            }
        });
        // Replacing a finished kick, or one already inside its cycle, only
        // signals a shutdown it no longer listens for.
        self.tasks().kick = Some(kick);
    }

    // ========================================================================
    // CONNECTIVITY
    // ========================================================================

    fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }

    fn spawn_connectivity_listener(&self) -> ScheduledTask {
        let weak = self.self_ref.clone();
        let mut connectivity = self.connectivity.clone();
        ScheduledTask::spawn("connectivity_listener", move |mut shutdown_rx| async move {
            connectivity.borrow_and_update();
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Connectivity channel closed");
                            break;
                        }
                        let state = *connectivity.borrow_and_update();
                        match weak.upgrade() {
                            Some(this) => this.handle_connectivity(state).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    /// React to a connectivity transition. Reconnecting runs a full cycle.
    pub async fn handle_connectivity(&self, state: ConnectivityState) {
        match state {
            ConnectivityState::Online => {
                tracing::info!("Connectivity restored, starting full sync");
                match self.perform_full_sync().await {
                    Ok(SyncOutcome::Completed(report)) => tracing::info!(
                        synced = report.synced,
                        failed = report.failed,
                        "Reconnection sync completed"
                    ),
                    Ok(outcome) => tracing::debug!(?outcome, "Reconnection sync not started"),
                    Err(e) => tracing::warn!(error = %e, "Reconnection sync failed"),
                }
            }
            ConnectivityState::Offline => {
                tracing::info!("Connectivity lost, sync paused");
            }
        }
    }

    // ========================================================================
    // SYNC CYCLE
    // ========================================================================

    /// Run one drain-then-pull cycle.
    ///
    /// # Errors
    ///
    /// Returns an error only if the outbox cannot be read before the drain
    /// begins. Remote failures are reported per item in the [`SyncReport`].
    pub async fn perform_full_sync(&self) -> TetherResult<SyncOutcome> {
        if !self.is_online() {
            tracing::debug!("Offline, sync cycle not started");
            return Ok(SyncOutcome::Offline);
        }
        let Some(_busy) = BusyGuard::acquire(&self.syncing) else {
            tracing::debug!("Sync already in progress");
            return Ok(SyncOutcome::AlreadyInProgress);
        };

        self.state.send_replace(SyncState::Syncing);
        self.emit(SyncEvent::CycleStarted { at: Utc::now() });

        let pending = match self.store.pending_list().await {
            Ok(pending) => pending,
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %e, "Sync cycle failed before drain");
                self.state.send_replace(SyncState::Error(message.clone()));
                self.emit(SyncEvent::CycleFailed { message });
                return Err(e);
            }
        };

        let mut report = SyncReport::default();
        self.drain(pending, &mut report).await;
        self.pull(&mut report).await;

        if report.made_progress() {
            self.record_progress(&mut report).await;
        }

        self.state.send_replace(SyncState::Idle);
        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            confirmed = report.operations_confirmed,
            abandoned = report.operations_abandoned,
            retrying = report.operations_retrying,
            "Sync cycle completed"
        );
        self.emit(SyncEvent::CycleCompleted {
            report: report.clone(),
        });
        Ok(SyncOutcome::Completed(report))
    }

    async fn drain(&self, pending: Vec<PendingOperation>, report: &mut SyncReport) {
        for mut op in pending {
            let failure = match self.remote.execute(&op.payload).await {
                Ok(true) => None,
                Ok(false) => Some(("remote refused the operation".to_string(), false)),
                Err(e) => Some((e.to_string(), e.is_transient())),
            };

            let Some((reason, transient)) = failure else {
                match self.store.pending_remove(op.id).await {
                    Ok(_) => {
                        report.operations_confirmed += 1;
                        report.synced += 1;
                    }
                    Err(e) => report.record_error(format!(
                        "{} {} confirmed but not removed: {e}",
                        op.payload.name(),
                        op.id
                    )),
                }
                continue;
            };

            if op.record_failure(self.config.max_retries) {
                // Reported only once the row is gone, so a failed remove is
                // retried next cycle instead of being reported twice.
                if let Err(e) = self.store.pending_remove(op.id).await {
                    tracing::warn!(
                        operation_id = %op.id,
                        error = %e,
                        "Outbox operation at retry cap could not be removed"
                    );
                    report.operations_retrying += 1;
                    report.record_error(format!(
                        "{} {} hit its retry cap but was not removed: {e}",
                        op.payload.name(),
                        op.id
                    ));
                    continue;
                }
                tracing::warn!(
                    operation_id = %op.id,
                    operation = op.payload.name(),
                    attempts = op.retry_count,
                    transient,
                    error = %reason,
                    "Abandoning outbox operation"
                );
                report.operations_abandoned += 1;
                report.failed += 1;
                report.record_error(format!(
                    "{} {} abandoned after {} attempts: {reason}",
                    op.payload.name(),
                    op.id,
                    op.retry_count
                ));
            } else {
                tracing::debug!(
                    operation_id = %op.id,
                    operation = op.payload.name(),
                    attempts = op.retry_count,
                    transient,
                    error = %reason,
                    "Outbox operation will be retried"
                );
                report.operations_retrying += 1;
                if let Err(e) = self.store.pending_update(&op).await {
                    report.record_error(format!(
                        "{} {} retry count not saved: {e}",
                        op.payload.name(),
                        op.id
                    ));
                }
            }
        }
    }

    async fn pull(&self, report: &mut SyncReport) {
        for collection in Collection::ALL {
            let merged = match collection {
                Collection::Groups => self.pull_groups().await,
                Collection::Keywords => self.pull_keywords().await,
                Collection::Files => self.pull_files().await,
            };
            match merged {
                Ok(count) => {
                    tracing::debug!(%collection, count, "Pulled collection");
                    report.synced += count as u32;
                    report.collections_pulled.push(collection);
                }
                Err(e) => {
                    tracing::warn!(%collection, error = %e, "Pull failed");
                    report.failed += 1;
                    report.collections_failed.push(collection);
                    report.record_error(format!("pull {collection} failed: {e}"));
                }
            }
        }
    }

    async fn pull_groups(&self) -> TetherResult<usize> {
        let groups = self.remote.fetch_groups().await?;
        self.store.group_bulk_put(&groups).await
    }

    async fn pull_keywords(&self) -> TetherResult<usize> {
        let records: Vec<KeywordRecord> = self
            .remote
            .fetch_keywords()
            .await?
            .into_iter()
            .map(RemoteKeyword::into_record)
            .collect();
        self.store.keyword_bulk_put(&records).await
    }

    async fn pull_files(&self) -> TetherResult<usize> {
        let files = self.remote.fetch_files().await?;
        self.store.file_bulk_put(&files).await
    }

    async fn record_progress(&self, report: &mut SyncReport) {
        let now = Utc::now();
        let outstanding = match self.store.pending_list().await {
            Ok(ops) => ops,
            Err(e) => {
                report.record_error(format!("outstanding operations not listed: {e}"));
                Vec::new()
            }
        };

        for collection in Collection::ALL {
            let mut metadata = match self.store.metadata_get(collection).await {
                Ok(Some(metadata)) => metadata,
                Ok(None) => SyncMetadata::new(collection),
                Err(e) => {
                    tracing::warn!(%collection, error = %e, "Sync metadata unreadable, resetting");
                    SyncMetadata::new(collection)
                }
            };
            let pending_ids = outstanding
                .iter()
                .filter(|op| op.collection() == collection)
                .map(|op| op.id)
                .collect();
            metadata.advance(now, pending_ids);
            if let Err(e) = self.store.metadata_put(&metadata).await {
                report.record_error(format!("{collection} metadata not saved: {e}"));
            }
        }

        *self.last_sync_guard() = Some(now);
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn emit(&self, event: SyncEvent) {
        let event_type = event.event_type();
        match self.events.send(event) {
            Ok(receivers) => tracing::trace!(event_type, receivers, "Sync event sent"),
            Err(_) => tracing::trace!(event_type, "No receivers for sync event"),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn last_sync_guard(&self) -> MutexGuard<'_, Option<Timestamp>> {
        self.last_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::{StoreError, TetherError};
    use tether_storage::MemoryStore;
    use tether_test_utils::{fixtures, Endpoint, MockRemote, Script};

    fn orchestrator(
        store: Arc<MemoryStore>,
        remote: Arc<MockRemote>,
    ) -> (Arc<SyncOrchestrator>, watch::Sender<ConnectivityState>) {
        let (tx, rx) = watch::channel(ConnectivityState::Online);
        let orchestrator = SyncOrchestrator::new(store, remote, SyncConfig::development(), rx)
            .expect("valid config");
        (orchestrator, tx)
    }

    fn delete_group(name: &str) -> OperationPayload {
        OperationPayload::DeleteGroup {
            group_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_cycle_confirms_and_pulls() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(fixtures::seeded_remote(9));
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), Arc::clone(&remote));

        orchestrator
            .add_local_operation(delete_group("old"))
            .await
            .expect("enqueue");

        let outcome = orchestrator.perform_full_sync().await.expect("cycle");
        let report = outcome.report().expect("cycle should run");
        assert_eq!(report.operations_confirmed, 1);
        assert_eq!(report.collections_pulled.len(), 3);
        assert_eq!(report.failed, 0);

        let status = orchestrator.status().await.expect("status");
        assert_eq!(status.pending_operation_count, 0);
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_sync_timestamp.is_some());
        assert_eq!(store.counts().await.expect("counts").keywords, 9);
        assert_eq!(remote.mutations(), vec![delete_group("old")]);
    }

    #[tokio::test]
    async fn test_offline_cycle_does_not_touch_outbox() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let (orchestrator, tx) = orchestrator(Arc::clone(&store), Arc::clone(&remote));
        tx.send_replace(ConnectivityState::Offline);

        orchestrator
            .add_local_operation(delete_group("g"))
            .await
            .expect("enqueue");
        let outcome = orchestrator.perform_full_sync().await.expect("cycle");

        assert_eq!(outcome, SyncOutcome::Offline);
        assert_eq!(remote.data_calls(), 0);
        let pending = store.pending_list().await.expect("list");
        assert_eq!(pending[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_failed_operation_retried_then_abandoned() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        remote.script(Endpoint::RemoveGroup, Script::FailAlways);
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), Arc::clone(&remote));

        orchestrator
            .add_local_operation(delete_group("stuck"))
            .await
            .expect("enqueue");

        for attempt in 1..3 {
            let outcome = orchestrator.perform_full_sync().await.expect("cycle");
            let report = outcome.report().expect("cycle should run");
            assert_eq!(report.operations_retrying, 1);
            assert!(report.errors.is_empty());
            let pending = store.pending_list().await.expect("list");
            assert_eq!(pending[0].retry_count, attempt);
        }

        let outcome = orchestrator.perform_full_sync().await.expect("cycle");
        let report = outcome.report().expect("cycle should run");
        assert_eq!(report.operations_abandoned, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("abandoned after 3 attempts"));
        assert_eq!(store.pending_count().await.expect("count"), 0);
        assert_eq!(remote.calls(Endpoint::RemoveGroup), 3);
    }

    #[tokio::test]
    async fn test_refused_operation_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        remote.script(Endpoint::RemoveFile, Script::RefuseAlways);
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), remote);

        orchestrator
            .add_local_operation(OperationPayload::DeleteFile {
                filename: "a.csv".to_string(),
            })
            .await
            .expect("enqueue");
        let outcome = orchestrator.perform_full_sync().await.expect("cycle");
        assert_eq!(outcome.report().map(|r| r.operations_retrying), Some(1));
    }

    #[tokio::test]
    async fn test_store_failure_before_drain_sets_error_state() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), remote);
        let mut events = orchestrator.subscribe();

        store.set_unavailable(true);
        let err = orchestrator
            .perform_full_sync()
            .await
            .expect_err("cycle should fail");
        assert!(matches!(err, TetherError::Store(StoreError::Unavailable { .. })));
        assert!(matches!(orchestrator.state(), SyncState::Error(_)));
        assert!(!orchestrator.is_syncing());

        assert_eq!(
            events.recv().await.expect("event").event_type(),
            "cycle_started"
        );
        assert_eq!(
            events.recv().await.expect("event").event_type(),
            "cycle_failed"
        );

        store.set_unavailable(false);
        orchestrator.perform_full_sync().await.expect("recovered cycle");
        assert_eq!(orchestrator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_no_progress_leaves_timestamp_unset() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        for endpoint in [Endpoint::FetchGroups, Endpoint::FetchKeywords, Endpoint::FetchFiles] {
            remote.script(endpoint, Script::FailAlways);
        }
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), remote);

        let outcome = orchestrator.perform_full_sync().await.expect("cycle");
        let report = outcome.report().expect("cycle should run");
        assert_eq!(report.failed, 3);
        assert!(!report.made_progress());
        assert!(orchestrator.last_sync_timestamp().is_none());
        assert!(store.metadata_list().await.expect("metadata").is_empty());
    }

    #[tokio::test]
    async fn test_progress_advances_metadata() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(fixtures::seeded_remote(3));
        remote.script(Endpoint::RemoveGroup, Script::FailAlways);
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), remote);

        let op = orchestrator
            .add_local_operation(delete_group("g"))
            .await
            .expect("enqueue");
        orchestrator.perform_full_sync().await.expect("cycle");
        orchestrator.perform_full_sync().await.expect("cycle");

        let groups = store
            .metadata_get(Collection::Groups)
            .await
            .expect("metadata")
            .expect("row should exist");
        assert_eq!(groups.version, 2);
        assert_eq!(groups.pending_operation_ids, vec![op.id]);
        let keywords = store
            .metadata_get(Collection::Keywords)
            .await
            .expect("metadata")
            .expect("row should exist");
        assert!(keywords.pending_operation_ids.is_empty());
    }

    #[tokio::test]
    async fn test_delete_keyword_locally_is_atomic_with_outbox() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let (orchestrator, _tx) = orchestrator(Arc::clone(&store), remote);
        let record = fixtures::sample_keywords(1).remove(0);
        store.keyword_put(&record).await.expect("put");

        assert!(orchestrator
            .delete_keyword_locally(&record.id)
            .await
            .expect("delete"));
        assert!(store.keyword_get(&record.id).await.expect("get").is_none());
        let pending = store.pending_list().await.expect("list");
        assert_eq!(pending[0].payload, fixtures::delete_keyword_payload(&record));

        assert!(!orchestrator
            .delete_keyword_locally("missing")
            .await
            .expect("delete"));
        assert_eq!(store.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_local_change_kicks_a_sync() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let (tx, rx) = watch::channel(ConnectivityState::Online);
        let config = SyncConfig::development().with_auto_sync(true);
        let orchestrator =
            SyncOrchestrator::new(store.clone(), remote.clone(), config, rx).expect("valid config");

        for name in ["a", "b", "c"] {
            orchestrator
                .add_local_operation(delete_group(name))
                .await
                .expect("enqueue");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.pending_count().await.expect("count"), 0);
        assert_eq!(remote.calls(Endpoint::FetchGroups), 1, "kicks should coalesce");
        drop(tx);
    }

    #[tokio::test]
    async fn test_auto_sync_toggle() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let (orchestrator, _tx) = orchestrator(store, Arc::clone(&remote));

        orchestrator.set_auto_sync(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        orchestrator.set_auto_sync(false);
        let calls = remote.calls(Endpoint::FetchGroups);
        assert!(calls >= 1, "auto sync should have run");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(remote.calls(Endpoint::FetchGroups), calls);
        assert!(!orchestrator.status().await.expect("status").auto_sync_enabled);
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within two seconds");
    }

    #[tokio::test]
    async fn test_stopping_timers_lets_running_cycle_finish() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(fixtures::seeded_remote(6));
        remote.set_delay(Duration::from_millis(100));
        let (tx, rx) = watch::channel(ConnectivityState::Online);
        let config = SyncConfig::development().with_auto_sync(true);
        let orchestrator =
            SyncOrchestrator::new(store.clone(), remote.clone(), config, rx).expect("valid config");
        orchestrator.init();

        wait_until(|| orchestrator.is_syncing()).await;
        orchestrator.set_auto_sync(false);
        orchestrator.dispose().await;

        wait_until(|| !orchestrator.is_syncing()).await;
        assert!(orchestrator.last_sync_timestamp().is_some());
        assert_eq!(orchestrator.state(), SyncState::Idle);
        assert_eq!(remote.calls(Endpoint::FetchFiles), 1);
        assert_eq!(store.counts().await.expect("counts").keywords, 6);
        drop(tx);
    }

    #[tokio::test]
    async fn test_dispose_cancels_waiting_kick() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let (_tx, rx) = watch::channel(ConnectivityState::Online);
        let config = SyncConfig {
            local_change_delay: Duration::from_millis(100),
            ..SyncConfig::development().with_auto_sync(true)
        };
        let orchestrator =
            SyncOrchestrator::new(store.clone(), remote.clone(), config, rx).expect("valid config");

        orchestrator
            .add_local_operation(delete_group("a"))
            .await
            .expect("enqueue");
        orchestrator.dispose().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(remote.data_calls(), 0);
        assert_eq!(store.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_capped_entry_reported_once_when_remove_fails() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        remote.script(Endpoint::RemoveGroup, Script::FailAlways);
        remote.set_delay(Duration::from_millis(100));
        let (_tx, rx) = watch::channel(ConnectivityState::Online);
        let config = SyncConfig::development().with_max_retries(1);
        let orchestrator =
            SyncOrchestrator::new(store.clone(), remote.clone(), config, rx).expect("valid config");
        orchestrator
            .add_local_operation(delete_group("a"))
            .await
            .expect("enqueue");

        // The store goes away while the remote call is in flight, so the
        // capped entry cannot be removed.
        let cycle = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.perform_full_sync().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_unavailable(true);
        let first = cycle.await.expect("cycle task").expect("cycle");
        store.set_unavailable(false);

        let first = first.report().expect("cycle should run").clone();
        assert_eq!(first.operations_abandoned, 0);
        assert_eq!(store.pending_count().await.expect("count"), 1);

        let second = orchestrator.perform_full_sync().await.expect("cycle");
        let second = second.report().expect("cycle should run").clone();
        assert_eq!(second.operations_abandoned, 1);
        assert_eq!(store.pending_count().await.expect("count"), 0);

        let abandoned = first
            .errors
            .iter()
            .chain(second.errors.iter())
            .filter(|e| e.contains("abandoned"))
            .count();
        assert_eq!(abandoned, 1);
    }

    #[test]
    fn test_zero_auto_sync_interval_rejected() {
        let (_tx, rx) = watch::channel(ConnectivityState::Online);
        let config = SyncConfig {
            auto_sync_interval: Duration::ZERO,
            ..SyncConfig::development()
        };
        let result = SyncOrchestrator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockRemote::new()),
            config,
            rx,
        );
        assert!(matches!(result, Err(TetherError::Config(_))));
    }
}

