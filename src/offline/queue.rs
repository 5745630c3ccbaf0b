//! # Durable Action Queue
//!
//! Persisted FIFO of mutations waiting to be replayed against the backend.
//!
//! ## Features
//!
//! - **Persistent Queue**: every change is written through to the
//!   [`KeyValueStore`] before the call returns, so actions survive restarts
//! - **Retry Metadata**: attempt count, last attempt time and last error are
//!   persisted with each action
//! - **Failure List**: actions that can never succeed are moved to a failed
//!   list for reporting instead of being dropped
//! - **Cleanup**: exhausted actions past the retention window are discarded
//! - **Corruption Tolerance**: an undecodable entry is discarded and logged;
//!   it never blocks the rest of the queue
//!
//! The whole pending list is stored under one key, so an enqueue is a single
//! atomic `set`: after a crash the action is either fully present or absent.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use prayersync::offline::queue::{ActionKind, ActionQueue, QueuedAction};
//! use prayersync::local_db::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> prayersync::Result<()> {
//! let queue = ActionQueue::new(Arc::new(MemoryStore::new()));
//! let action = QueuedAction::new(ActionKind::RecordInteraction, "prayer_interactions",
//!     serde_json::json!({"prayer_id": "42"}));
//! let id = queue.enqueue(action).await?;
//!
//! for action in queue.list_pending().await? {
//!     // Execute action...
//!     queue.remove(&action.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::local_db::KeyValueStore;
use crate::shared::entity::{EntityId, Mutation, MutationId};
use crate::shared::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

const PENDING_KEY: &str = "action_queue/pending";
const FAILED_KEY: &str = "action_queue/failed";

/// What an action does on the remote side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateEntity,
    UpdateEntity,
    DeleteEntity,
    /// Side record such as "prayed for this"; no cache entity is changed
    RecordInteraction,
}

/// Where the action currently lives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting to be executed
    Pending,
    /// Will never be retried; kept for reporting
    Failed,
}

/// A pending mutation awaiting execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedAction {
    /// Locally generated id, also used as the remote idempotency key
    pub id: Uuid,
    pub kind: ActionKind,
    /// Remote table or channel the action targets
    pub channel: String,
    /// Entity the action touches, if any
    pub entity_id: Option<EntityId>,
    /// Optimistic mutation to confirm or roll back when this settles
    pub mutation_id: Option<MutationId>,
    /// Data needed to replay the action
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    /// Failed execution attempts so far; never decreases
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub status: ActionStatus,
}

impl QueuedAction {
    pub fn new(kind: ActionKind, channel: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            channel: channel.into(),
            entity_id: None,
            mutation_id: None,
            payload,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
            status: ActionStatus::Pending,
        }
    }

    pub fn for_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn for_mutation(mut self, mutation_id: MutationId) -> Self {
        self.mutation_id = Some(mutation_id);
        self
    }

    /// Durable form of an optimistic mutation; the payload is the mutation
    /// itself so it can be re-applied after a restart
    pub fn from_mutation(
        channel: impl Into<String>,
        mutation_id: MutationId,
        mutation: &Mutation,
    ) -> Result<Self> {
        let kind = match mutation {
            Mutation::Create { .. } => ActionKind::CreateEntity,
            Mutation::Update { .. } => ActionKind::UpdateEntity,
            Mutation::Delete { .. } => ActionKind::DeleteEntity,
        };
        Ok(Self::new(kind, channel, serde_json::to_value(mutation)?)
            .for_entity(mutation.entity_id().clone())
            .for_mutation(mutation_id))
    }

    /// Decode the mutation stored by [`QueuedAction::from_mutation`]
    pub fn mutation(&self) -> Result<Mutation> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            SyncError::malformed(format!("{:?} action {}: {}", self.kind, self.id, e))
        })
    }

    /// Whether the action is older than `retention` at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match chrono::Duration::from_std(retention) {
            Ok(retention) => self.enqueued_at + retention < now,
            Err(_) => false,
        }
    }
}

/// Durable queue of pending actions
pub struct ActionQueue {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles on the stored lists
    write_lock: Mutex<()>,
    enqueued: Notify,
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue").finish_non_exhaustive()
    }
}

impl ActionQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            enqueued: Notify::new(),
        }
    }

    /// Append an action; returns its id once it is durably stored
    pub async fn enqueue(&self, mut action: QueuedAction) -> Result<Uuid> {
        let guard = self.write_lock.lock().await;
        let mut pending = self.load(PENDING_KEY).await?;
        if pending.iter().any(|a| a.id == action.id) {
            tracing::debug!("[Queue] Action {} already queued", action.id);
            return Ok(action.id);
        }
        action.status = ActionStatus::Pending;
        let id = action.id;
        tracing::debug!("[Queue] Enqueue {:?} {} for {:?}", action.kind, id, action.entity_id);
        pending.push(action);
        self.save(PENDING_KEY, &pending).await?;
        drop(guard);

        self.enqueued.notify_one();
        Ok(id)
    }

    /// All pending actions in FIFO order by `enqueued_at`
    pub async fn list_pending(&self) -> Result<Vec<QueuedAction>> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.load(PENDING_KEY).await?;
        pending.sort_by_key(|a| a.enqueued_at);
        Ok(pending)
    }

    /// Actions that failed permanently
    pub async fn list_failed(&self) -> Result<Vec<QueuedAction>> {
        let _guard = self.write_lock.lock().await;
        self.load(FAILED_KEY).await
    }

    /// Delete a pending action; returns whether it was present
    pub async fn remove(&self, id: &Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.load(PENDING_KEY).await?;
        let before = pending.len();
        pending.retain(|a| a.id != *id);
        if pending.len() == before {
            return Ok(false);
        }
        self.save(PENDING_KEY, &pending).await?;
        Ok(true)
    }

    /// Record a failed attempt; returns the new attempt count
    pub async fn increment_attempt(&self, id: &Uuid, error: &str) -> Result<Option<u32>> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.load(PENDING_KEY).await?;
        let Some(action) = pending.iter_mut().find(|a| a.id == *id) else {
            return Ok(None);
        };
        action.attempt_count = action.attempt_count.saturating_add(1);
        action.last_attempt_at = Some(Utc::now());
        action.last_error = Some(error.to_string());
        let count = action.attempt_count;
        self.save(PENDING_KEY, &pending).await?;
        Ok(Some(count))
    }

    /// Move a pending action to the failed list
    pub async fn mark_failed(&self, id: &Uuid, error: &str) -> Result<Option<QueuedAction>> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.load(PENDING_KEY).await?;
        let Some(position) = pending.iter().position(|a| a.id == *id) else {
            return Ok(None);
        };
        let mut action = pending.remove(position);
        action.status = ActionStatus::Failed;
        action.last_error = Some(error.to_string());

        let mut failed = self.load(FAILED_KEY).await?;
        failed.push(action.clone());
        // Failed list first: a crash in between leaves a duplicate, never a loss.
        self.save(FAILED_KEY, &failed).await?;
        self.save(PENDING_KEY, &pending).await?;
        tracing::warn!("[Queue] Action {} failed permanently: {}", id, error);
        Ok(Some(action))
    }

    /// Forget a failed action after the user has seen it
    pub async fn dismiss_failed(&self, id: &Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut failed = self.load(FAILED_KEY).await?;
        let before = failed.len();
        failed.retain(|a| a.id != *id);
        if failed.len() == before {
            return Ok(false);
        }
        self.save(FAILED_KEY, &failed).await?;
        Ok(true)
    }

    /// Discard actions past `retention` that have exhausted their retries
    pub async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
        max_attempts: u32,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;

        let mut failed = self.load(FAILED_KEY).await?;
        let before = failed.len();
        failed.retain(|a| !a.is_expired(now, retention));
        if failed.len() != before {
            removed += before - failed.len();
            self.save(FAILED_KEY, &failed).await?;
        }

        let mut pending = self.load(PENDING_KEY).await?;
        let before = pending.len();
        pending.retain(|a| !(a.is_expired(now, retention) && a.attempt_count >= max_attempts));
        if pending.len() != before {
            removed += before - pending.len();
            self.save(PENDING_KEY, &pending).await?;
        }

        if removed > 0 {
            tracing::info!("[Queue] Cleaned up {} expired actions", removed);
        }
        Ok(removed)
    }

    /// Get queue statistics
    pub async fn stats(&self) -> Result<QueueStats> {
        let _guard = self.write_lock.lock().await;
        Ok(QueueStats {
            pending: self.load(PENDING_KEY).await?.len(),
            failed: self.load(FAILED_KEY).await?.len(),
        })
    }

    /// Resolves after the next successful enqueue
    pub async fn wait_for_enqueue(&self) {
        self.enqueued.notified().await;
    }

    /// Decode one stored list, dropping entries that no longer parse
    async fn load(&self, key: &str) -> Result<Vec<QueuedAction>> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(Vec::new());
        };

        let raw: Vec<Value> = match serde_json::from_slice(&bytes) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("[Queue] Discarding unreadable list {}: {}", key, e);
                self.store.remove(key).await?;
                return Ok(Vec::new());
            }
        };

        let total = raw.len();
        let actions: Vec<QueuedAction> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<QueuedAction>(value) {
                Ok(action) => Some(action),
                Err(e) => {
                    tracing::error!("[Queue] Discarding malformed entry in {}: {}", key, e);
                    None
                }
            })
            .collect();

        if actions.len() != total {
            self.save(key, &actions).await?;
        }
        Ok(actions)
    }

    async fn save(&self, key: &str, actions: &[QueuedAction]) -> Result<()> {
        let bytes = serde_json::to_vec(actions)?;
        self.store.set(key, &bytes).await
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub failed: usize,
}
