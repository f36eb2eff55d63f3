//! Connectivity Monitor
//!
//! Owns the authoritative online/offline signal. Link events from the host
//! platform are only hints: each one triggers a health-check probe, and the
//! probe result decides the state. A periodic poll probes as well.
//!
//! The monitor also owns the offline queue, a retry queue separate from the
//! outbox where each entry carries its own retry cap.

use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tether_core::{
    ConnectivityState, ConnectivityStatus, EffectiveConnectionType, LinkEvent, LinkQuality,
    MonitorConfig, OperationId, OperationPayload, QueueDrainReport, QueueEntrySummary,
    QueueStatus, QueuedOperation, RemoteService, TetherResult, Timestamp,
};
use tokio::sync::watch;

use crate::schedule::{BusyGuard, ScheduledTask};

/// Offline queue entries plus a reset counter.
#[derive(Debug, Default)]
struct OfflineQueue {
    entries: VecDeque<QueuedOperation>,
    /// Bumped by `clear_queue`; a drain that started under an older
    /// generation discards the entries it would otherwise put back.
    generation: u64,
}

#[derive(Debug, Default)]
struct LinkInfo {
    connection: Option<EffectiveConnectionType>,
    last_checked: Option<Timestamp>,
}

/// Tracks reachability of the remote service and drains the offline queue.
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteService>,
    config: MonitorConfig,
    state: watch::Sender<ConnectivityState>,
    link: Mutex<LinkInfo>,
    queue: Mutex<OfflineQueue>,
    draining: AtomicBool,
    permanent_failures: AtomicU64,
    tasks: Mutex<Vec<ScheduledTask>>,
    self_ref: Weak<ConnectivityMonitor>,
}

impl ConnectivityMonitor {
    /// Create a monitor that assumes the link is up until a probe says
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Rejects a config with a zero poll interval or probe timeout.
    pub fn new(remote: Arc<dyn RemoteService>, config: MonitorConfig) -> TetherResult<Arc<Self>> {
        Self::with_initial_state(remote, config, ConnectivityState::Online)
    }

    pub fn with_initial_state(
        remote: Arc<dyn RemoteService>,
        config: MonitorConfig,
        initial: ConnectivityState,
    ) -> TetherResult<Arc<Self>> {
        config.validate()?;
        let (state, _) = watch::channel(initial);
        Ok(Arc::new_cyclic(|self_ref| Self {
            remote,
            config,
            state,
            link: Mutex::new(LinkInfo::default()),
            queue: Mutex::new(OfflineQueue::default()),
            draining: AtomicBool::new(false),
            permanent_failures: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        }))
    }

    /// Probe once, then start the health poll and the queue processor.
    pub async fn init(&self) {
        self.check_now().await;

        let mut tasks = Vec::with_capacity(2);
        let weak = self.self_ref.clone();
        tasks.push(ScheduledTask::every(
            "health_check",
            self.config.health_check_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.check_now().await;
                    }
                }
            },
        ));
        let weak = self.self_ref.clone();
        tasks.push(ScheduledTask::every(
            "offline_queue",
            self.config.queue_process_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.process_queue().await;
                    }
                }
            },
        ));

        let previous = std::mem::replace(&mut *self.tasks_guard(), tasks);
        drop(previous);

        tracing::info!(
            state = ?self.state(),
            health_check_interval_secs = self.config.health_check_interval.as_secs(),
            queue_process_interval_secs = self.config.queue_process_interval.as_secs(),
            "Connectivity monitor initialized"
        );
    }

    /// Stop the poll and the queue processor and wait for them.
    pub async fn dispose(&self) {
        let tasks = std::mem::take(&mut *self.tasks_guard());
        for task in tasks {
            task.stop().await;
        }
        tracing::info!("Connectivity monitor disposed");
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Receive every published state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    pub fn link_quality(&self) -> LinkQuality {
        LinkQuality::classify(self.link_guard().connection)
    }

    pub fn status(&self) -> ConnectivityStatus {
        let (link_quality, last_checked) = {
            let link = self.link_guard();
            (LinkQuality::classify(link.connection), link.last_checked)
        };
        ConnectivityStatus {
            state: self.state(),
            link_quality,
            last_checked,
            queue_depth: self.queue_guard().entries.len(),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
        }
    }

    /// Deliver a link-layer hint. The hint triggers a probe; the probe
    /// decides the state.
    pub async fn notify_link_event(&self, event: LinkEvent) -> ConnectivityState {
        if let LinkEvent::Up { connection } = event {
            self.link_guard().connection = connection;
        }
        tracing::debug!(?event, "Link event received, probing");
        self.check_now().await
    }

    /// Run a health-check probe now and apply its result.
    pub async fn check_now(&self) -> ConnectivityState {
        let timeout = self.config.health_check_timeout;
        let reachable = match tokio::time::timeout(timeout, self.remote.health_check()).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Health check failed");
                false
            }
            Err(_) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Health check timed out");
                false
            }
        };
        self.apply_probe(reachable).await
    }

    /// Record a probe result. Publishes only when the state changes; going
    /// online flushes the offline queue.
    pub async fn apply_probe(&self, reachable: bool) -> ConnectivityState {
        self.link_guard().last_checked = Some(Utc::now());

        let next = ConnectivityState::from_reachable(reachable);
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            match next {
                ConnectivityState::Online => {
                    tracing::info!(
                        queue_depth = self.queue_guard().entries.len(),
                        "Remote reachable"
                    );
                    let report = self.process_queue().await;
                    if report.attempted > 0 {
                        tracing::info!(
                            succeeded = report.succeeded,
                            retrying = report.retrying,
                            dropped = report.dropped,
                            "Offline queue flushed on reconnect"
                        );
                    }
                }
                ConnectivityState::Offline => tracing::warn!("Remote unreachable"),
            }
        }
        next
    }

    // ========================================================================
    // OFFLINE QUEUE
    // ========================================================================

    /// Enqueue an operation for the offline queue. `max_retries` defaults to
    /// the configured cap.
    pub fn add_offline_operation(
        &self,
        payload: OperationPayload,
        max_retries: Option<u32>,
    ) -> OperationId {
        let op = QueuedOperation::new(
            payload,
            max_retries.unwrap_or(self.config.default_max_retries),
        );
        let id = op.id;
        tracing::debug!(
            operation_id = %id,
            operation = op.payload.name(),
            max_retries = op.max_retries,
            "Offline operation queued"
        );
        self.queue_guard().entries.push_back(op);
        id
    }

    pub fn queue_status(&self) -> QueueStatus {
        let queue = self.queue_guard();
        let mut by_kind = BTreeMap::new();
        let entries = queue
            .entries
            .iter()
            .map(|op| {
                *by_kind.entry(op.payload.kind()).or_insert(0) += 1;
                QueueEntrySummary {
                    id: op.id,
                    name: op.payload.name().to_string(),
                    kind: op.payload.kind(),
                    retry_count: op.retry_count,
                    max_retries: op.max_retries,
                    enqueued_at: op.enqueued_at,
                }
            })
            .collect();
        QueueStatus {
            depth: queue.entries.len(),
            by_kind,
            entries,
        }
    }

    /// Drop every queued operation. Returns how many were removed.
    ///
    /// Entries held by a drain in flight are discarded when it finishes
    /// instead of being put back.
    pub fn clear_queue(&self) -> usize {
        let mut queue = self.queue_guard();
        let removed = queue.entries.len();
        queue.entries.clear();
        queue.generation = queue.generation.wrapping_add(1);
        removed
    }

    /// Execute every queued operation once.
    ///
    /// Skipped while offline or while another drain is running. Entries that
    /// fail stay queued ahead of anything enqueued during the drain, unless
    /// their cap is reached, in which case they are dropped and counted as a
    /// permanent failure.
    pub async fn process_queue(&self) -> QueueDrainReport {
        if !self.is_online() {
            return QueueDrainReport::skipped();
        }
        let Some(_busy) = BusyGuard::acquire(&self.draining) else {
            return QueueDrainReport::skipped();
        };

        let (batch, generation) = {
            let mut queue = self.queue_guard();
            let batch: Vec<QueuedOperation> = queue.entries.drain(..).collect();
            (batch, queue.generation)
        };
        let mut report = QueueDrainReport::default();
        let mut kept = Vec::new();

        for mut op in batch {
            report.attempted += 1;
            let failure = match self.remote.execute(&op.payload).await {
                Ok(true) => None,
                Ok(false) => Some("remote refused the operation".to_string()),
                Err(e) => Some(e.to_string()),
            };
            let Some(reason) = failure else {
                report.succeeded += 1;
                continue;
            };

            if op.record_failure() {
                tracing::warn!(
                    operation_id = %op.id,
                    operation = op.payload.name(),
                    attempts = op.retry_count,
                    error = %reason,
                    "Dropping offline operation"
                );
                self.permanent_failures.fetch_add(1, Ordering::Relaxed);
                report.dropped += 1;
                report.errors.push(format!(
                    "{} {} dropped after {} attempts: {reason}",
                    op.payload.name(),
                    op.id,
                    op.retry_count
                ));
            } else {
                report.retrying += 1;
                kept.push(op);
            }
        }

        if !kept.is_empty() {
            let mut queue = self.queue_guard();
            if queue.generation == generation {
                for op in kept.into_iter().rev() {
                    queue.entries.push_front(op);
                }
            } else {
                tracing::debug!(
                    discarded = kept.len(),
                    "Offline queue reset during drain, failed entries discarded"
                );
                report.retrying = 0;
            }
        }

        if report.attempted > 0 {
            tracing::debug!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                retrying = report.retrying,
                dropped = report.dropped,
                "Offline queue processed"
            );
        }
        report
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn link_guard(&self) -> MutexGuard<'_, LinkInfo> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue_guard(&self) -> MutexGuard<'_, OfflineQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks_guard(&self) -> MutexGuard<'_, Vec<ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::OperationKind;
    use tether_test_utils::{Endpoint, MockRemote, Script};

    fn monitor(remote: Arc<MockRemote>) -> Arc<ConnectivityMonitor> {
        ConnectivityMonitor::new(remote, MonitorConfig::development()).expect("valid config")
    }

    fn delete_file(name: &str) -> OperationPayload {
        OperationPayload::DeleteFile {
            filename: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_probe_publishes_only_on_change() {
        let remote = Arc::new(MockRemote::new());
        let monitor = monitor(Arc::clone(&remote));
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.check_now().await, ConnectivityState::Online);
        assert!(!rx.has_changed().expect("channel open"));

        remote.set_reachable(false);
        assert_eq!(monitor.check_now().await, ConnectivityState::Offline);
        assert!(rx.has_changed().expect("channel open"));
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Offline);

        monitor.check_now().await;
        assert!(!rx.has_changed().expect("channel open"));
        assert!(monitor.status().last_checked.is_some());
    }

    #[tokio::test]
    async fn test_link_event_is_only_a_hint() {
        let remote = Arc::new(MockRemote::new());
        remote.set_reachable(false);
        let monitor = monitor(Arc::clone(&remote));

        let state = monitor
            .notify_link_event(LinkEvent::Up {
                connection: Some(EffectiveConnectionType::ThreeG),
            })
            .await;
        assert_eq!(state, ConnectivityState::Offline);
        assert_eq!(monitor.link_quality(), LinkQuality::Fair);
        assert_eq!(remote.calls(Endpoint::HealthCheck), 1);

        remote.set_reachable(true);
        let state = monitor.notify_link_event(LinkEvent::Down).await;
        assert_eq!(state, ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_slow_health_check_counts_as_offline() {
        let remote = Arc::new(MockRemote::new());
        remote.set_delay(Duration::from_millis(500));
        let monitor = monitor(remote);
        assert_eq!(monitor.check_now().await, ConnectivityState::Offline);
    }

    #[tokio::test]
    async fn test_queue_skipped_while_offline() {
        let remote = Arc::new(MockRemote::new());
        let monitor = ConnectivityMonitor::with_initial_state(
            Arc::clone(&remote) as Arc<dyn RemoteService>,
            MonitorConfig::development(),
            ConnectivityState::Offline,
        )
        .expect("valid config");
        monitor.add_offline_operation(delete_file("a.csv"), None);

        let report = monitor.process_queue().await;
        assert!(report.skipped);
        assert_eq!(monitor.queue_status().depth, 1);
        assert_eq!(remote.data_calls(), 0);
    }

    #[tokio::test]
    async fn test_queue_entry_dropped_at_own_cap() {
        let remote = Arc::new(MockRemote::new());
        remote.script(Endpoint::RemoveFile, Script::FailAlways);
        let monitor = monitor(Arc::clone(&remote));
        monitor.add_offline_operation(delete_file("a.csv"), Some(2));

        let first = monitor.process_queue().await;
        assert_eq!(first.retrying, 1);
        assert_eq!(monitor.queue_status().entries[0].retry_count, 1);

        let second = monitor.process_queue().await;
        assert_eq!(second.dropped, 1);
        assert_eq!(second.errors.len(), 1);
        assert_eq!(monitor.queue_status().depth, 0);
        assert_eq!(monitor.status().permanent_failures, 1);
    }

    #[tokio::test]
    async fn test_retrying_entries_keep_their_place() {
        let remote = Arc::new(MockRemote::new());
        remote.script(Endpoint::RemoveFile, Script::FailTimes(1));
        let monitor = monitor(Arc::clone(&remote));
        let first = monitor.add_offline_operation(delete_file("a.csv"), None);
        monitor.add_offline_operation(
            OperationPayload::DeleteGroup {
                group_name: "g".to_string(),
            },
            None,
        );

        let report = monitor.process_queue().await;
        assert_eq!(report.succeeded, 1);
        let second = monitor.add_offline_operation(delete_file("b.csv"), None);

        let status = monitor.queue_status();
        let ids: Vec<_> = status.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(status.by_kind.get(&OperationKind::Delete), Some(&2));
    }

    #[tokio::test]
    async fn test_reconnect_flushes_queue() {
        let remote = Arc::new(MockRemote::new());
        remote.set_reachable(false);
        let monitor = monitor(Arc::clone(&remote));
        monitor.check_now().await;
        monitor.add_offline_operation(delete_file("a.csv"), None);
        monitor.add_offline_operation(delete_file("b.csv"), None);

        remote.set_reachable(true);
        assert_eq!(monitor.check_now().await, ConnectivityState::Online);
        assert_eq!(monitor.queue_status().depth, 0);
        assert_eq!(remote.mutations().len(), 2);
    }

    #[tokio::test]
    async fn test_init_and_dispose_run_background_probes() {
        let remote = Arc::new(MockRemote::new());
        let monitor = monitor(Arc::clone(&remote));
        monitor.init().await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        monitor.dispose().await;

        let probes = remote.calls(Endpoint::HealthCheck);
        assert!(probes >= 2, "expected initial plus polled probes, got {probes}");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(remote.calls(Endpoint::HealthCheck), probes);
    }

    #[tokio::test]
    async fn test_reset_during_drain_discards_failed_entries() {
        let remote = Arc::new(MockRemote::new());
        remote.script(Endpoint::RemoveFile, Script::FailAlways);
        remote.set_delay(Duration::from_millis(100));
        let monitor = monitor(Arc::clone(&remote));
        monitor.add_offline_operation(delete_file("a.csv"), None);

        let drain = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.process_queue().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.clear_queue();

        let report = drain.await.expect("drain task");
        assert_eq!(report.attempted, 1);
        assert_eq!(report.retrying, 0);
        assert_eq!(monitor.queue_status().depth, 0);

        monitor.add_offline_operation(delete_file("b.csv"), None);
        remote.clear_script(Endpoint::RemoveFile);
        remote.set_delay(Duration::ZERO);
        let report = monitor.process_queue().await;
        assert_eq!(report.succeeded, 1);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let remote = Arc::new(MockRemote::new());
        let config = MonitorConfig {
            health_check_interval: Duration::ZERO,
            ..MonitorConfig::development()
        };
        assert!(matches!(
            ConnectivityMonitor::new(remote, config),
            Err(tether_core::TetherError::Config(_))
        ));
    }
}
