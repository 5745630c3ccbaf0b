//! # Background Sync
//!
//! Drains the durable action queue against the backend whenever the device
//! is online.
//!
//! ## Architecture
//!
//! - **Drain Loop**: woken by `BecameOnline`, by new enqueues, by an explicit
//!   nudge, and periodically while online
//! - **Ordering**: FIFO by `enqueued_at`, scoped per entity; an action never
//!   overtakes an earlier pending action on the same entity, unrelated
//!   actions do not wait on each other
//! - **Fresh Reads**: every step re-reads `list_pending`, so actions enqueued
//!   mid-cycle are picked up in the same cycle
//! - **Outcomes**: final results go to an [`OutcomeListener`]; this module
//!   never renders or rolls back anything itself
//!
//! ## Key Components
//!
//! - `network_monitor.rs`: connectivity state and transitions
//! - `scheduler.rs`: drain timing and per-action backoff
//! - `sync_state.rs`: observable drain state
//! - `metrics.rs`: drain and outcome counters

pub mod metrics;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

pub use metrics::SyncMetrics;
pub use network_monitor::{ConnectivityEvent, NetworkMonitor, NetworkStatus, ReachabilityProbe};
pub use scheduler::DrainScheduler;
pub use sync_state::SyncState;

use crate::offline::executor::{classify, ExecOutcome, OutcomeListener, RemoteExecutor, SyncOutcome};
use crate::offline::queue::{ActionQueue, QueuedAction};
use crate::offline::retry::RetryPolicy;
use crate::shared::config::SyncConfig;
use crate::shared::entity::EntityId;
use crate::shared::error::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use uuid::Uuid;

/// What one drain cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    /// Failed but left queued for a later attempt
    pub retried: usize,
    /// Removed and reported
    pub failed: usize,
    /// Skipped because their backoff has not elapsed
    pub deferred: usize,
    /// The cycle stopped early because the device went offline
    pub halted_offline: bool,
}

struct SyncInner {
    config: SyncConfig,
    queue: Arc<ActionQueue>,
    executor: Arc<dyn RemoteExecutor>,
    monitor: Arc<NetworkMonitor>,
    listener: Arc<dyn OutcomeListener>,
    scheduler: DrainScheduler,
    state: RwLock<SyncState>,
    metrics: RwLock<SyncMetrics>,
    /// One drain at a time
    drain_lock: Mutex<()>,
    nudge: Notify,
    shutdown: Notify,
}

/// Retry scheduler service
pub struct SyncService {
    inner: Arc<SyncInner>,
    background_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        queue: Arc<ActionQueue>,
        executor: Arc<dyn RemoteExecutor>,
        monitor: Arc<NetworkMonitor>,
        listener: Arc<dyn OutcomeListener>,
    ) -> Self {
        let scheduler = DrainScheduler::new(config.drain_interval, RetryPolicy::queue(&config));
        let state = SyncState {
            network_status: monitor.status(),
            ..SyncState::default()
        };
        Self {
            inner: Arc::new(SyncInner {
                config,
                queue,
                executor,
                monitor,
                listener,
                scheduler,
                state: RwLock::new(state),
                metrics: RwLock::new(SyncMetrics::new()),
                drain_lock: Mutex::new(()),
                nudge: Notify::new(),
                shutdown: Notify::new(),
            }),
            background_task: std::sync::Mutex::new(None),
        }
    }

    /// Start the background drain loop; a no-op if it is already running
    pub fn start(&self) {
        let mut task = self
            .background_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!("[Sync] Sync service is already running");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            inner.background_loop().await;
        }));
        tracing::info!("[Sync] Background drain loop started");
    }

    /// Stop the background loop, letting a drain in progress finish
    pub async fn stop(&self) {
        let task = self
            .background_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            self.inner.shutdown.notify_one();
            let _ = task.await;
            tracing::info!("[Sync] Background drain loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.background_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Ask the background loop to drain soon
    pub fn nudge(&self) {
        self.inner.nudge.notify_one();
    }

    /// Run one drain cycle now
    pub async fn drain_once(&self) -> Result<DrainReport> {
        self.inner.drain().await
    }

    /// Get current sync status
    pub async fn status(&self) -> SyncState {
        let mut state = self.inner.state.read().await.clone();
        state.network_status = self.inner.monitor.status();
        state
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.inner.metrics.read().await.clone()
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        let task = self
            .background_task
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl SyncInner {
    async fn background_loop(&self) {
        let mut connectivity = self.monitor.subscribe();
        if self.monitor.is_online() {
            self.drain_logged().await;
        }

        loop {
            let wait = self.next_wakeup().await;
            tokio::select! {
                _ = self.shutdown.notified() => break,
                event = connectivity.recv() => match event {
                    Ok(ConnectivityEvent::BecameOnline) => self.drain_logged().await,
                    Ok(ConnectivityEvent::BecameOffline) => {
                        self.state.write().await.network_status = NetworkStatus::Offline;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.monitor.is_online() {
                            self.drain_logged().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = self.queue.wait_for_enqueue() => {
                    if self.monitor.is_online() {
                        self.drain_logged().await;
                    }
                }
                _ = self.nudge.notified() => self.drain_logged().await,
                _ = tokio::time::sleep(wait) => {
                    if self.monitor.is_online() {
                        self.drain_logged().await;
                    }
                }
            }
        }
    }

    async fn next_wakeup(&self) -> std::time::Duration {
        if !self.monitor.is_online() {
            return self.scheduler.interval();
        }
        match self.queue.list_pending().await {
            Ok(pending) => self.scheduler.next_wakeup(&pending, Utc::now()),
            Err(e) => {
                tracing::warn!("[Sync] Could not read queue: {}", e);
                self.scheduler.interval()
            }
        }
    }

    async fn drain_logged(&self) {
        if let Err(e) = self.drain().await {
            tracing::error!("[Sync] Drain cycle failed: {}", e);
            self.state.write().await.last_error = Some(e.to_string());
        }
    }

    async fn drain(&self) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        if !self.monitor.is_online() {
            tracing::debug!("[Sync] Offline, skipping drain");
            return Ok(DrainReport {
                halted_offline: true,
                ..DrainReport::default()
            });
        }

        self.state.write().await.is_draining = true;
        self.metrics.write().await.record_drain_start();

        let result = self.run_cycle().await;

        let stats = self.queue.stats().await;
        {
            let mut state = self.state.write().await;
            state.is_draining = false;
            state.last_drain = Some(Utc::now());
            state.network_status = self.monitor.status();
            if let Ok(stats) = &stats {
                state.pending_actions = stats.pending;
                state.failed_actions = stats.failed;
            }
            match &result {
                Ok(report) if report.retried == 0 && report.failed == 0 => state.last_error = None,
                Ok(_) => {}
                Err(e) => state.last_error = Some(e.to_string()),
            }
        }
        self.metrics.write().await.record_drain_end();

        let report = result?;
        tracing::info!(
            "[Sync] Drain finished: {} succeeded, {} retrying, {} failed, {} deferred",
            report.succeeded,
            report.retried,
            report.failed,
            report.deferred
        );
        Ok(report)
    }

    async fn run_cycle(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut attempted: HashSet<Uuid> = HashSet::new();
        let mut deferred: HashSet<Uuid> = HashSet::new();

        while let Some(action) = self.next_action(&attempted, &mut deferred).await? {
            attempted.insert(action.id);
            tracing::debug!("[Sync] Executing {:?} {}", action.kind, action.id);
            let result = self.executor.execute(&action).await;

            match classify(action.kind, result) {
                ExecOutcome::Succeeded(entity) => {
                    self.queue.remove(&action.id).await?;
                    self.metrics.write().await.record_success();
                    self.listener.on_outcome(SyncOutcome::new(&action, Ok(entity)));
                    report.succeeded += 1;
                }
                ExecOutcome::Retry(error) => {
                    let attempts = self
                        .queue
                        .increment_attempt(&action.id, &error.to_string())
                        .await?
                        .unwrap_or(action.attempt_count.saturating_add(1));

                    if self.scheduler.policy().is_exhausted(attempts) {
                        tracing::warn!(
                            "[Sync] {:?} {} gave up after {} attempts: {}",
                            action.kind,
                            action.id,
                            attempts,
                            error
                        );
                        self.fail(&action, error.clone()).await?;
                        report.failed += 1;
                    } else {
                        self.metrics.write().await.record_retry();
                        report.retried += 1;
                    }

                    // One failed call is inconclusive; ask again before going on.
                    if !self.monitor.recheck().await {
                        tracing::info!("[Sync] Unreachable after {}, halting drain", error);
                        report.halted_offline = true;
                        break;
                    }
                }
                ExecOutcome::Failed(error) => {
                    self.fail(&action, error).await?;
                    report.failed += 1;
                }
            }
        }

        report.deferred = deferred.len();
        let removed = self
            .queue
            .cleanup_expired(Utc::now(), self.config.retention, self.config.max_attempts)
            .await?;
        if removed > 0 {
            tracing::debug!("[Sync] Discarded {} expired actions", removed);
        }
        Ok(report)
    }

    /// First pending action that may run now.
    ///
    /// Every pending action blocks later actions on the same entity, whether
    /// or not it is itself runnable this cycle.
    async fn next_action(
        &self,
        attempted: &HashSet<Uuid>,
        deferred: &mut HashSet<Uuid>,
    ) -> Result<Option<QueuedAction>> {
        let now = Utc::now();
        let mut blocked: HashSet<EntityId> = HashSet::new();

        for action in self.queue.list_pending().await? {
            let entity_blocked = match &action.entity_id {
                Some(id) => !blocked.insert(id.clone()),
                None => false,
            };
            if entity_blocked || attempted.contains(&action.id) {
                continue;
            }
            if !self.scheduler.is_due(&action, now) {
                deferred.insert(action.id);
                continue;
            }
            return Ok(Some(action));
        }
        Ok(None)
    }

    async fn fail(&self, action: &QueuedAction, error: crate::SyncError) -> Result<()> {
        self.queue.mark_failed(&action.id, &error.to_string()).await?;
        self.metrics.write().await.record_failure();
        self.listener.on_outcome(SyncOutcome::new(action, Err(error)));
        Ok(())
    }
}
