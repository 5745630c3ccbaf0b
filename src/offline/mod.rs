//! # Offline-First Sync
//!
//! Optimistic cache updates, a durable action queue, and realtime
//! reconciliation, coordinated by [`OfflineManager`].
//!
//! ## Architecture
//!
//! - **Optimistic Cache**: user mutations are visible immediately and rolled
//!   back exactly once if they finally fail
//! - **Action Queue**: mutations persist until the backend accepts them,
//!   across restarts
//! - **Reconciliation**: remote change notifications merge into the cache
//!   without undoing local intent
//! - **Retry Logic**: bounded exponential backoff on both the direct and the
//!   queued path
//!
//! ## Key Components
//!
//! - `optimistic.rs`: cache, snapshots, rollback and error reporting
//! - `queue.rs`: durable action queue
//! - `retry.rs`: retry policies and backoff
//! - `executor.rs`: remote execution contract and outcome classification
//! - `reconciliation.rs`: push channel merge rules and subscriptions
//! - `view.rs`: per-view scopes with teardown
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use prayersync::offline::{Collaborators, OfflineManager};
//! # use prayersync::shared::prayer::PrayerDraft;
//! # async fn demo(collaborators: Collaborators) -> prayersync::Result<()> {
//! let manager = OfflineManager::new(Default::default(), "prayers", collaborators);
//! manager.recover().await?;
//! manager.start();
//!
//! let draft = PrayerDraft {
//!     author_id: "user-1".into(),
//!     group_id: None,
//!     title: "Exams".into(),
//!     body: "Pray for focus this week".into(),
//! };
//! manager.submit(draft.into_mutation()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod optimistic;
pub mod queue;
pub mod reconciliation;
pub mod retry;
pub mod view;

pub use executor::{classify, ExecOutcome, OutcomeListener, RemoteExecutor, SyncOutcome};
pub use optimistic::{Lookup, OptimisticController, UserError};
pub use queue::{ActionKind, ActionQueue, ActionStatus, QueueStats, QueuedAction};
pub use reconciliation::{
    BroadcastPushChannel, ChangeStream, IgnoreReason, MergeOutcome, PushChannel,
    RealtimeReconciler, SubscriptionHandle,
};
pub use retry::{retry_with_backoff, BackoffStrategy, RetryPolicy};
pub use view::{ViewEvent, ViewId, ViewScope};

use crate::local_db::KeyValueStore;
use crate::shared::config::SyncConfig;
use crate::shared::entity::{CacheEntity, EntityId, Mutation, MutationId};
use crate::shared::error::{Result, SyncError};
use crate::shared::event::ChangeFilter;
use crate::sync::{NetworkMonitor, SyncMetrics, SyncService, SyncState};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// External pieces the manager is wired to
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub push: Arc<dyn PushChannel>,
    pub monitor: Arc<NetworkMonitor>,
}

/// Main offline manager coordinating all offline functionality
pub struct OfflineManager {
    config: SyncConfig,
    /// Remote table mutations are written to
    channel: String,
    queue: Arc<ActionQueue>,
    controller: Arc<OptimisticController>,
    executor: Arc<dyn RemoteExecutor>,
    monitor: Arc<NetworkMonitor>,
    reconciler: RealtimeReconciler,
    sync: SyncService,
}

impl std::fmt::Debug for OfflineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineManager")
            .field("channel", &self.channel)
            .field("controller", &self.controller)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl OfflineManager {
    pub fn new(config: SyncConfig, channel: impl Into<String>, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            executor,
            push,
            monitor,
        } = collaborators;

        let queue = Arc::new(ActionQueue::new(store.clone()));
        let controller = Arc::new(OptimisticController::new(config.tombstone_capacity));
        let reconciler = RealtimeReconciler::new(controller.clone(), push, store);
        let sync = SyncService::new(
            config.clone(),
            queue.clone(),
            executor.clone(),
            monitor.clone(),
            controller.clone(),
        );

        Self {
            config,
            channel: channel.into(),
            queue,
            controller,
            executor,
            monitor,
            reconciler,
            sync,
        }
    }

    /// Start the background drain loop
    pub fn start(&self) {
        self.sync.start();
    }

    pub async fn stop(&self) {
        self.sync.stop().await;
    }

    /// Re-apply mutations still queued from a previous session.
    ///
    /// Call once at startup, before `load_entities`, so fetched data does not
    /// briefly show state the user has already changed. Returns how many
    /// mutations were restored.
    pub async fn recover(&self) -> Result<usize> {
        let mut restored = 0;
        for action in self.queue.list_pending().await? {
            let Some(mutation_id) = action.mutation_id else {
                continue;
            };
            let mutation = match action.mutation() {
                Ok(mutation) => mutation,
                Err(e) => {
                    tracing::error!("[Queue] Cannot restore action {}: {}", action.id, e);
                    continue;
                }
            };
            match self.controller.restore_queued(mutation_id, mutation) {
                Ok(()) => restored += 1,
                Err(e) => tracing::debug!("[Queue] Action {} not restored: {}", action.id, e),
            }
        }
        tracing::info!("[Queue] Restored {} queued mutations", restored);
        Ok(restored)
    }

    /// Replace the cache with a fresh fetch, keeping local intent
    pub fn load_entities(&self, fetched: Vec<CacheEntity>) {
        self.controller.load_entities(fetched);
    }

    /// Apply `mutation` now and queue it for the backend
    pub async fn submit(&self, mutation: Mutation) -> Result<MutationId> {
        let mutation_id = self.controller.apply_optimistic(mutation.clone())?;
        self.enqueue_applied(mutation_id, &mutation).await
    }

    /// Like [`submit`](Self::submit), reporting the outcome to `view`
    pub async fn submit_from(&self, view: &ViewScope, mutation: Mutation) -> Result<MutationId> {
        let mutation_id = self.controller.apply_optimistic_for(view.id(), mutation.clone())?;
        self.enqueue_applied(mutation_id, &mutation).await
    }

    /// Wait for any in-flight mutation on the same entity to settle, then
    /// submit
    pub async fn submit_when_settled(
        &self,
        mutation: Mutation,
        view: Option<&ViewScope>,
    ) -> Result<MutationId> {
        let origin = view.map(ViewScope::id);
        let mutation_id = self.controller.apply_when_settled(mutation.clone(), origin).await?;
        self.enqueue_applied(mutation_id, &mutation).await
    }

    async fn enqueue_applied(&self, mutation_id: MutationId, mutation: &Mutation) -> Result<MutationId> {
        let queued = match QueuedAction::from_mutation(self.channel.as_str(), mutation_id, mutation) {
            Ok(action) => self.queue.enqueue(action).await.map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = queued {
            // Not durable, so it will never be sent; undo it now
            tracing::error!("[Queue] Could not queue mutation {}: {}", mutation_id, e);
            if let Err(rollback_error) = self.controller.rollback(mutation_id, e.clone()) {
                tracing::warn!("[Optimistic] {}", rollback_error);
            }
            return Err(e);
        }

        if self.monitor.is_online() {
            self.sync.nudge();
        }
        Ok(mutation_id)
    }

    /// Apply `mutation` now and send it directly, retrying transient
    /// failures a few times before rolling back.
    ///
    /// Returns as soon as the cache is updated. Offline, the mutation goes
    /// through the durable queue instead.
    pub async fn fire_and_confirm(&self, mutation: Mutation, view: Option<&ViewScope>) -> Result<MutationId> {
        if !self.monitor.is_online() {
            tracing::debug!("[Optimistic] Offline, queueing instead of sending directly");
            return match view {
                Some(view) => self.submit_from(view, mutation).await,
                None => self.submit(mutation).await,
            };
        }

        let action = QueuedAction::from_mutation(self.channel.as_str(), MutationId::new(), &mutation)?;
        let mutation_id = match view {
            Some(view) => self.controller.apply_optimistic_for(view.id(), mutation)?,
            None => self.controller.apply_optimistic(mutation)?,
        };
        let action = action.for_mutation(mutation_id);

        let policy = RetryPolicy::direct(&self.config);
        let executor = self.executor.clone();
        let controller = self.controller.clone();
        tokio::spawn(async move {
            let result = retry_with_backoff(&policy, |_| {
                let executor = executor.clone();
                let action = action.clone();
                async move { executor.execute(&action).await }
            })
            .await;

            let result = match classify(action.kind, result) {
                ExecOutcome::Succeeded(entity) => Ok(entity),
                ExecOutcome::Retry(e) | ExecOutcome::Failed(e) => Err(e),
            };
            controller.on_outcome(SyncOutcome::new(&action, result));
        });

        Ok(mutation_id)
    }

    /// Queue a fire-and-forget interaction (e.g. "prayed for this") that
    /// touches no cached entity
    pub async fn record_interaction(&self, channel: &str, payload: serde_json::Value) -> Result<Uuid> {
        let id = self
            .queue
            .enqueue(QueuedAction::new(ActionKind::RecordInteraction, channel, payload))
            .await?;
        if self.monitor.is_online() {
            self.sync.nudge();
        }
        Ok(id)
    }

    /// Mount a view over the shared cache
    pub fn mount_view(&self) -> ViewScope {
        self.controller.mount_view()
    }

    /// Subscribe `view` to remote changes matching `filter`; the
    /// subscription ends when the view unmounts
    pub async fn subscribe(&self, view: &mut ViewScope, filter: ChangeFilter) -> Result<()> {
        let handle = self.reconciler.subscribe(filter).await?;
        view.attach(handle);
        Ok(())
    }

    pub fn lookup(&self, id: &EntityId) -> Lookup {
        self.controller.lookup(id)
    }

    pub fn entities(&self) -> Vec<CacheEntity> {
        self.controller.entities()
    }

    /// User-visible failures, one per failed mutation
    pub fn subscribe_errors(&self) -> broadcast::Receiver<UserError> {
        self.controller.subscribe_errors()
    }

    /// Feed the platform reachability signal
    pub fn set_reachable(&self, reachable: bool) {
        self.monitor.set_reachable(reachable);
    }

    /// Drain the queue now instead of waiting for the background loop
    pub async fn sync_now(&self) -> Result<crate::sync::DrainReport> {
        self.sync.drain_once().await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn failed_actions(&self) -> Result<Vec<QueuedAction>> {
        self.queue.list_failed().await
    }

    pub async fn dismiss_failed(&self, id: &Uuid) -> Result<bool> {
        self.queue.dismiss_failed(id).await
    }

    pub async fn status(&self) -> SyncState {
        self.sync.status().await
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.sync.metrics().await
    }

    pub fn controller(&self) -> &Arc<OptimisticController> {
        &self.controller
    }

    pub fn reconciler(&self) -> &RealtimeReconciler {
        &self.reconciler
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }
}
