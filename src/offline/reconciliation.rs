/**
 * Realtime Reconciliation
 *
 * Merges remote change notifications into the optimistic cache without
 * duplicating or clobbering changes this client has in flight.
 *
 * # Merge Rules
 *
 * For a notification about entity E carrying version T:
 * - E has a pending delete: a delete is our own echo and is dropped; an
 *   insert or update is folded into the delete's snapshot so a rollback
 *   restores the newest copy. Nothing resurrects E while the delete is
 *   in flight.
 * - E is tombstoned (deleted and confirmed): inserts and updates are dropped.
 * - The cached version of E is >= T: dropped as stale or duplicate.
 * - Otherwise the change is applied, re-applying any pending local update
 *   on top so local intent stays visible until it settles.
 *
 * An insert whose `client_ref` names a cached temporary entity is the echo of
 * our own creation and replaces that entry in place.
 *
 * # Subscription Lifecycle
 *
 * Each view subscription runs in its own task and is torn down through its
 * [`SubscriptionHandle`]. Cancellation takes the cache lock, so once
 * `cancel` returns no merge for that subscription can touch the cache.
 */
use crate::local_db::KeyValueStore;
use crate::offline::optimistic::{CacheState, OptimisticController};
use crate::shared::entity::{CacheEntity, Mutation};
use crate::shared::error::Result;
use crate::shared::event::{ChangeEvent, ChangeFilter, ChangeType, SyncCursor};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CURSOR_PREFIX: &str = "sync_cursor/";

/// Stream of change notifications for one filter
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Source of remote change notifications.
///
/// Delivery is at-least-once and may be reordered relative to the remote
/// executor's own confirmations.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a stream of events matching `filter`.
    ///
    /// `since` only bounds a replay of history the channel kept while nobody
    /// was listening. Live events are delivered whatever their commit time,
    /// since delivery may reorder them; the merge step drops duplicates by
    /// version.
    async fn subscribe(&self, filter: &ChangeFilter, since: Option<SyncCursor>) -> Result<ChangeStream>;
}

/// In-process push channel over a tokio broadcast
#[derive(Debug, Clone)]
pub struct BroadcastPushChannel {
    tx: broadcast::Sender<ChangeEvent>,
}

impl BroadcastPushChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an event to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

#[async_trait]
impl PushChannel for BroadcastPushChannel {
    async fn subscribe(&self, filter: &ChangeFilter, since: Option<SyncCursor>) -> Result<ChangeStream> {
        let rx = self.tx.subscribe();
        let filter = filter.clone();
        // Nothing is retained between subscriptions, so there is no history to replay.
        tracing::debug!(
            "[Realtime] Subscribed to {} (cursor {:?})",
            filter.key(),
            since.map(|cursor| cursor.committed_at)
        );

        let stream = stream::unfold((rx, filter), |(mut rx, filter)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !filter.matches(&event) {
                            continue;
                        }
                        return Some((event, (rx, filter)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("[Realtime] Receiver lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("[Realtime] Broadcast channel closed, ending stream");
                        return None;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Why a notification left the cache untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Cached version is already at or past the notification's
    Stale,
    /// Echo of this client's own pending delete
    OwnEcho,
    /// The entity was deleted; it must not come back
    Deleted,
    /// Update for an entity outside the cached slice
    NotCached,
    /// The subscription was torn down
    Detached,
}

/// What merging one notification did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Removed,
    /// Replaced a temporary entry created by this client
    Adopted,
    /// Recorded in a pending mutation's snapshot, not shown
    Folded,
    Ignored(IgnoreReason),
}

impl MergeOutcome {
    /// Whether the visible cache changed
    pub fn changed_cache(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Inserted | MergeOutcome::Updated | MergeOutcome::Removed | MergeOutcome::Adopted
        )
    }
}

/// Merge one notification into the cache
pub(crate) fn merge_event(state: &mut CacheState, event: &ChangeEvent) -> MergeOutcome {
    let id = &event.entity_id;

    if event.change_type == ChangeType::Delete {
        if state.in_flight.contains(id) {
            // Gone remotely either way, so a failed local delete must not restore it.
            if let Some(pending) = state.pending_for_mut(id) {
                pending.snapshot.removed_remotely = true;
            }
            return MergeOutcome::Ignored(IgnoreReason::OwnEcho);
        }
        return match state.position(id) {
            Some(i) if state.entities[i].version >= event.version => {
                MergeOutcome::Ignored(IgnoreReason::Stale)
            }
            Some(i) => {
                state.entities.remove(i);
                if let Some(pending) = state.pending_for_mut(id) {
                    pending.snapshot.removed_remotely = true;
                }
                state.tombstones.insert(id.clone());
                MergeOutcome::Removed
            }
            None => {
                state.tombstones.insert(id.clone());
                MergeOutcome::Ignored(IgnoreReason::NotCached)
            }
        };
    }

    if state.tombstones.contains(id) {
        return MergeOutcome::Ignored(IgnoreReason::Deleted);
    }

    let replace = event.change_type == ChangeType::Insert;
    let remote = event.to_entity();

    if replace {
        if let Some(outcome) = adopt_echo(state, event, &remote) {
            return outcome;
        }
    }

    if state.in_flight.contains(id) {
        return fold_into_snapshot(state, remote, replace);
    }

    match state.position(id) {
        Some(i) if state.entities[i].version >= event.version => {
            MergeOutcome::Ignored(IgnoreReason::Stale)
        }
        Some(i) => {
            apply_remote(state, i, remote, replace);
            MergeOutcome::Updated
        }
        None if replace => {
            state.entities.insert(0, remote);
            MergeOutcome::Inserted
        }
        None => MergeOutcome::Ignored(IgnoreReason::NotCached),
    }
}

/// Take over the temporary entry named by the insert's `client_ref`
fn adopt_echo(state: &mut CacheState, event: &ChangeEvent, remote: &CacheEntity) -> Option<MergeOutcome> {
    let temp = event.client_ref()?;
    if temp == event.entity_id {
        return None;
    }
    let temp_pos = state.position(&temp)?;

    match state.position(&event.entity_id) {
        Some(_) => {
            state.entities.remove(temp_pos);
        }
        None => state.entities[temp_pos] = remote.clone(),
    }
    state.aliases.insert(temp.clone(), event.entity_id.clone());

    if let Some(mutation_id) = state.locks.get(&temp).copied() {
        state.locks.insert(event.entity_id.clone(), mutation_id);
        if let Some(pending) = state.pending.get_mut(&mutation_id) {
            pending.adopted_as = Some(event.entity_id.clone());
        }
    }
    tracing::debug!("[Realtime] Adopted {} as {}", temp, event.entity_id);
    Some(MergeOutcome::Adopted)
}

/// Record a remote change to an entity whose delete is still pending
fn fold_into_snapshot(state: &mut CacheState, remote: CacheEntity, replace: bool) -> MergeOutcome {
    let Some(pending) = state.pending_for_mut(&remote.id) else {
        return MergeOutcome::Ignored(IgnoreReason::OwnEcho);
    };
    match pending.snapshot.entity.as_mut() {
        Some(snapshot) if snapshot.version >= remote.version => {
            MergeOutcome::Ignored(IgnoreReason::Stale)
        }
        Some(snapshot) if !replace => {
            snapshot.merge_fields(&remote.fields);
            snapshot.version = remote.version;
            MergeOutcome::Folded
        }
        _ => {
            pending.snapshot.entity = Some(remote);
            MergeOutcome::Folded
        }
    }
}

/// Apply a newer remote copy at `index`, keeping a pending local update on top
fn apply_remote(state: &mut CacheState, index: usize, remote: CacheEntity, replace: bool) {
    let local_fields = match state.pending_for_mut(&remote.id) {
        Some(pending) => {
            if let Some(snapshot) = pending.snapshot.entity.as_mut() {
                if replace {
                    *snapshot = remote.clone();
                } else {
                    snapshot.merge_fields(&remote.fields);
                    snapshot.version = remote.version;
                }
            }
            match &pending.mutation {
                Mutation::Update { fields, .. } => Some(fields.clone()),
                _ => None,
            }
        }
        None => None,
    };

    let cached = &mut state.entities[index];
    if replace {
        *cached = remote;
    } else {
        cached.merge_fields(&remote.fields);
        cached.version = remote.version;
    }
    if let Some(fields) = local_fields {
        cached.merge_fields(&fields);
    }
}

/// Realtime reconciliation layer
pub struct RealtimeReconciler {
    controller: Arc<OptimisticController>,
    channel: Arc<dyn PushChannel>,
    store: Arc<dyn KeyValueStore>,
}

impl RealtimeReconciler {
    pub fn new(
        controller: Arc<OptimisticController>,
        channel: Arc<dyn PushChannel>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            controller,
            channel,
            store,
        }
    }

    /// Merge a single notification into the cache
    pub fn apply_event(&self, event: &ChangeEvent) -> MergeOutcome {
        let mut state = self.controller.state();
        let outcome = merge_event(&mut state, event);
        log_outcome(event, outcome);
        outcome
    }

    /// Last persisted cursor for `filter`
    pub async fn cursor(&self, filter: &ChangeFilter) -> Result<Option<SyncCursor>> {
        load_cursor(self.store.as_ref(), filter).await
    }

    /// Start merging notifications for `filter` into the cache
    pub async fn subscribe(&self, filter: ChangeFilter) -> Result<SubscriptionHandle> {
        let since = self.cursor(&filter).await?;
        let mut events = self.channel.subscribe(&filter, since).await?;
        let active = Arc::new(AtomicBool::new(true));

        let task = {
            let active = Arc::clone(&active);
            let controller = Arc::clone(&self.controller);
            let store = Arc::clone(&self.store);
            let filter = filter.clone();
            tokio::spawn(async move {
                let mut cursor = since;
                while let Some(event) = events.next().await {
                    if !filter.matches(&event) {
                        continue;
                    }
                    let outcome = {
                        let mut state = controller.state();
                        if !active.load(Ordering::SeqCst) {
                            MergeOutcome::Ignored(IgnoreReason::Detached)
                        } else {
                            merge_event(&mut state, &event)
                        }
                    };
                    log_outcome(&event, outcome);
                    if outcome == MergeOutcome::Ignored(IgnoreReason::Detached) {
                        break;
                    }

                    let advanced = match cursor {
                        Some(current) => current.advance(&event),
                        None => SyncCursor::new(event.committed_at),
                    };
                    if cursor != Some(advanced) {
                        cursor = Some(advanced);
                        if let Err(e) = save_cursor(store.as_ref(), &filter, advanced).await {
                            tracing::warn!("[Realtime] Could not persist cursor for {}: {}", filter.key(), e);
                        }
                    }
                }
                tracing::debug!("[Realtime] Stream for {} ended", filter.key());
            })
        };

        tracing::info!("[Realtime] Subscription active for {}", filter.key());
        Ok(SubscriptionHandle {
            filter,
            active,
            controller: Arc::clone(&self.controller),
            task: Some(task),
        })
    }

    /// Tear down `handle` and subscribe again from the persisted cursor
    pub async fn resubscribe(&self, handle: SubscriptionHandle) -> Result<SubscriptionHandle> {
        let filter = handle.filter.clone();
        handle.unsubscribe().await;
        self.subscribe(filter).await
    }
}

fn log_outcome(event: &ChangeEvent, outcome: MergeOutcome) {
    match outcome {
        MergeOutcome::Ignored(reason) => tracing::debug!(
            "[Realtime] Ignored {:?} {} v{}: {:?}",
            event.change_type,
            event.entity_id,
            event.version,
            reason
        ),
        outcome => tracing::debug!(
            "[Realtime] {:?} {} v{}: {:?}",
            event.change_type,
            event.entity_id,
            event.version,
            outcome
        ),
    }
}

fn cursor_key(filter: &ChangeFilter) -> String {
    format!("{}{}", CURSOR_PREFIX, filter.key())
}

async fn load_cursor(store: &dyn KeyValueStore, filter: &ChangeFilter) -> Result<Option<SyncCursor>> {
    let Some(bytes) = store.get(&cursor_key(filter)).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(cursor) => Ok(Some(cursor)),
        Err(e) => {
            tracing::error!("[Realtime] Discarding unreadable cursor for {}: {}", filter.key(), e);
            Ok(None)
        }
    }
}

async fn save_cursor(store: &dyn KeyValueStore, filter: &ChangeFilter, cursor: SyncCursor) -> Result<()> {
    let bytes = serde_json::to_vec(&cursor)?;
    store.set(&cursor_key(filter), &bytes).await
}

/// Handle to a live subscription; dropping it also tears it down
pub struct SubscriptionHandle {
    filter: ChangeFilter,
    active: Arc<AtomicBool>,
    controller: Arc<OptimisticController>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("filter", &self.filter)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Whether notifications are still being merged
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop merging immediately.
    ///
    /// Taking the cache lock orders this after any merge already running, so
    /// nothing from this subscription reaches the cache once it returns.
    pub fn cancel(&self) {
        let _state = self.controller.state();
        self.active.store(false, Ordering::SeqCst);
    }

    /// Cancel and wait for the subscription task to finish
    pub async fn unsubscribe(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        tracing::info!("[Realtime] Unsubscribed from {}", self.filter.key());
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.cancel();
            task.abort();
        }
    }
}
