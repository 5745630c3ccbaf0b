//! # Optimistic UI Updates
//!
//! Owns the in-memory entity cache shown to the user and applies mutations to
//! it before the backend confirms them.
//!
//! ## Features
//!
//! - **Immediate Updates**: `apply_optimistic` mutates the cache synchronously
//!   and returns the mutation id
//! - **Exact Rollback**: every pending mutation keeps a [`Snapshot`] of the
//!   entity and its neighbours, so a failed delete reappears where it was
//! - **In-Flight Guard**: ids with a pending delete read as
//!   [`Lookup::Pending`], never as "not found"
//! - **Per-Entity Locking**: a second mutation on a pending entity is
//!   rejected with [`SyncError::EntityBusy`] or waits via `apply_when_settled`
//! - **Error Surfacing**: each rollback broadcasts exactly one [`UserError`]
//!
//! Only this controller and the realtime reconciliation layer mutate the
//! cache. Everything else reads through accessors.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use prayersync::offline::optimistic::{Lookup, OptimisticController};
//! use prayersync::shared::entity::Mutation;
//! use prayersync::SyncError;
//!
//! # fn example(controller: &OptimisticController) -> prayersync::Result<()> {
//! let mutation_id = controller.apply_optimistic(Mutation::Delete { id: "b".into() })?;
//! assert_eq!(controller.lookup(&"b".into()), Lookup::Pending);
//!
//! // Later, when the remote call fails
//! controller.rollback(mutation_id, SyncError::network("timeout"))?;
//! # Ok(())
//! # }
//! ```

use crate::offline::executor::{OutcomeListener, SyncOutcome};
use crate::offline::view::{ViewEvent, ViewId, ViewScope};
use crate::shared::entity::{CacheEntity, EntityId, Mutation, MutationId};
use crate::shared::error::{Result, SyncError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, Notify};

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Result of reading one entity from the cache
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(CacheEntity),
    /// A destructive change is in flight; render a neutral pending state
    Pending,
    /// Known deleted; leave the screen quietly
    Deleted,
    /// Absent while the reading view is unmounting; render nothing
    Detached,
    /// Genuinely unknown; the only case worth an error
    NotFound,
}

impl Lookup {
    pub fn entity(&self) -> Option<&CacheEntity> {
        match self {
            Lookup::Found(entity) => Some(entity),
            _ => None,
        }
    }

    /// Whether the UI should render a hard error
    pub fn is_error(&self) -> bool {
        matches!(self, Lookup::NotFound)
    }
}

/// Failure reported to the UI after a rollback
#[derive(Debug, Clone, PartialEq)]
pub struct UserError {
    pub mutation_id: Option<MutationId>,
    pub entity_id: Option<EntityId>,
    pub cause: SyncError,
    /// Human-readable cause, e.g. "Network error"
    pub message: String,
    /// The caller should refresh before retrying
    pub refresh_required: bool,
}

impl UserError {
    pub fn new(mutation_id: Option<MutationId>, entity_id: Option<EntityId>, cause: SyncError) -> Self {
        Self {
            mutation_id,
            entity_id,
            message: cause.user_message(),
            refresh_required: cause.requires_refresh(),
            cause,
        }
    }
}

/// Pre-mutation copy of the affected slice of the cache
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Snapshot {
    pub(crate) entity: Option<CacheEntity>,
    pub(crate) index: usize,
    /// Id of the entity directly before, if any
    pub(crate) before: Option<EntityId>,
    /// Id of the entity directly after, if any
    pub(crate) after: Option<EntityId>,
    /// Deleted remotely while the mutation was pending; never restore
    pub(crate) removed_remotely: bool,
}

impl Snapshot {
    fn capture(entities: &[CacheEntity], index: usize) -> Self {
        Self {
            entity: entities.get(index).cloned(),
            index,
            before: index
                .checked_sub(1)
                .and_then(|i| entities.get(i))
                .map(|e| e.id.clone()),
            after: entities.get(index + 1).map(|e| e.id.clone()),
            removed_remotely: false,
        }
    }

    /// Index at which to reinsert the entity into `entities`.
    ///
    /// Anchors on the old predecessor, then the old successor, and only then
    /// falls back to the raw index, so the entity lands between the same
    /// neighbours even if unrelated entries moved meanwhile.
    fn restore_position(&self, entities: &[CacheEntity]) -> usize {
        if let Some(i) = self.before.as_ref().and_then(|id| position(entities, id)) {
            return i + 1;
        }
        if let Some(i) = self.after.as_ref().and_then(|id| position(entities, id)) {
            return i;
        }
        self.index.min(entities.len())
    }
}

/// One optimistic mutation awaiting its remote outcome
#[derive(Debug, Clone)]
pub(crate) struct PendingMutation {
    pub(crate) mutation: Mutation,
    pub(crate) snapshot: Snapshot,
    pub(crate) origin: Option<ViewId>,
    /// Server id taken over from a realtime echo of this creation
    pub(crate) adopted_as: Option<EntityId>,
}

/// Bounded memory of deleted ids
#[derive(Debug)]
pub(crate) struct Tombstones {
    ids: HashSet<EntityId>,
    order: VecDeque<EntityId>,
    capacity: usize,
}

impl Tombstones {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn insert(&mut self, id: EntityId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, id: &EntityId) -> bool {
        self.ids.contains(id)
    }
}

/// Everything guarded by the controller's lock
#[derive(Debug)]
pub(crate) struct CacheState {
    /// Entities in display order
    pub(crate) entities: Vec<CacheEntity>,
    /// Ids with a pending destructive mutation
    pub(crate) in_flight: HashSet<EntityId>,
    pub(crate) pending: HashMap<MutationId, PendingMutation>,
    /// Entity -> the pending mutation holding it
    pub(crate) locks: HashMap<EntityId, MutationId>,
    pub(crate) tombstones: Tombstones,
    /// Temporary id -> server id, once a creation is confirmed
    pub(crate) aliases: HashMap<EntityId, EntityId>,
}

impl CacheState {
    fn new(tombstone_capacity: usize) -> Self {
        Self {
            entities: Vec::new(),
            in_flight: HashSet::new(),
            pending: HashMap::new(),
            locks: HashMap::new(),
            tombstones: Tombstones::new(tombstone_capacity),
            aliases: HashMap::new(),
        }
    }

    pub(crate) fn position(&self, id: &EntityId) -> Option<usize> {
        position(&self.entities, id)
    }

    /// Pending mutation currently holding `id`
    pub(crate) fn pending_for_mut(&mut self, id: &EntityId) -> Option<&mut PendingMutation> {
        let mutation_id = *self.locks.get(id)?;
        self.pending.get_mut(&mutation_id)
    }

    /// Replace the cached copy if `record` is newer
    fn merge_newer(&mut self, record: CacheEntity) {
        if let Some(i) = self.position(&record.id) {
            if record.version > self.entities[i].version {
                self.entities[i] = record;
            }
        }
    }

    fn settle_create(&mut self, temp_id: &EntityId, server: Option<CacheEntity>) {
        let Some(record) = server else {
            return;
        };
        if record.id != *temp_id {
            self.aliases.insert(temp_id.clone(), record.id.clone());
        }
        let temp_pos = self.position(temp_id);
        let real_pos = if record.id == *temp_id {
            None
        } else {
            self.position(&record.id)
        };
        match (temp_pos, real_pos) {
            (Some(t), None) => self.entities[t] = record,
            (Some(t), Some(_)) => {
                // Echo without a client ref got in first; keep one copy.
                self.entities.remove(t);
                self.merge_newer(record);
            }
            (None, Some(_)) => self.merge_newer(record),
            (None, None) => {
                if !self.tombstones.contains(&record.id) {
                    self.entities.insert(0, record);
                }
            }
        }
    }
}

fn position(entities: &[CacheEntity], id: &EntityId) -> Option<usize> {
    entities.iter().position(|e| e.id == *id)
}

/// Optimistic state controller
pub struct OptimisticController {
    state: Mutex<CacheState>,
    settled: Notify,
    errors: broadcast::Sender<UserError>,
    views: Mutex<HashMap<ViewId, mpsc::UnboundedSender<ViewEvent>>>,
    next_view: AtomicU64,
}

impl std::fmt::Debug for OptimisticController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticController")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl OptimisticController {
    pub fn new(tombstone_capacity: usize) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(CacheState::new(tombstone_capacity)),
            settled: Notify::new(),
            errors,
            views: Mutex::new(HashMap::new()),
            next_view: AtomicU64::new(1),
        }
    }

    /// Lock the cache state. No await may happen while the guard is held.
    pub(crate) fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the visible entities in display order
    pub fn entities(&self) -> Vec<CacheEntity> {
        self.state().entities.clone()
    }

    pub fn get(&self, id: &EntityId) -> Option<CacheEntity> {
        let state = self.state();
        state.position(id).map(|i| state.entities[i].clone())
    }

    /// Read one entity, honouring the in-flight guard.
    ///
    /// The in-flight set is checked before the cache, and both live under the
    /// same lock the delete took, so there is no moment where a deleted id is
    /// missing from both.
    pub fn lookup(&self, id: &EntityId) -> Lookup {
        let state = self.state();
        let id = state.aliases.get(id).unwrap_or(id);
        if state.in_flight.contains(id) {
            return Lookup::Pending;
        }
        if let Some(i) = state.position(id) {
            return Lookup::Found(state.entities[i].clone());
        }
        if state.tombstones.contains(id) {
            Lookup::Deleted
        } else {
            Lookup::NotFound
        }
    }

    pub fn is_in_flight(&self, id: &EntityId) -> bool {
        self.state().in_flight.contains(id)
    }

    pub fn in_flight_ids(&self) -> HashSet<EntityId> {
        self.state().in_flight.clone()
    }

    /// Number of mutations awaiting their remote outcome
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Replace the cache with a freshly fetched list.
    ///
    /// Pending local intent survives the reload: in-flight deletes and
    /// tombstoned ids stay hidden, pending updates are re-applied on top of
    /// the fetched copy, and unconfirmed creations stay at the front.
    pub fn load_entities(&self, fetched: Vec<CacheEntity>) {
        let mut guard = self.state();
        let state = &mut *guard;

        let fetched_ids: HashSet<EntityId> = fetched.iter().map(|e| e.id.clone()).collect();
        let mut entities: Vec<CacheEntity> = Vec::with_capacity(fetched.len());
        for entity in fetched {
            if state.tombstones.contains(&entity.id) {
                continue;
            }
            if state.in_flight.contains(&entity.id) {
                let index = entities.len();
                let before = entities.last().map(|e| e.id.clone());
                if let Some(pending) = state.pending_for_mut(&entity.id) {
                    pending.snapshot = Snapshot {
                        entity: Some(entity),
                        index,
                        before,
                        after: None,
                        removed_remotely: false,
                    };
                }
                continue;
            }
            entities.push(entity);
        }

        // A pending entity missing from the fetch has nothing left to restore.
        for pending in state.pending.values_mut() {
            match &pending.mutation {
                Mutation::Update { id, fields } => match position(&entities, id) {
                    Some(i) => {
                        pending.snapshot = Snapshot::capture(&entities, i);
                        entities[i].merge_fields(fields);
                    }
                    None => pending.snapshot.entity = None,
                },
                Mutation::Delete { id } if !fetched_ids.contains(id) => {
                    pending.snapshot.entity = None;
                }
                _ => {}
            }
        }

        let unconfirmed: Vec<CacheEntity> = state
            .entities
            .iter()
            .filter(|e| {
                state.locks.get(&e.id).is_some_and(|mid| {
                    state
                        .pending
                        .get(mid)
                        .is_some_and(|p| matches!(p.mutation, Mutation::Create { .. }))
                })
            })
            .filter(|e| position(&entities, &e.id).is_none())
            .cloned()
            .collect();

        tracing::debug!(
            "[Optimistic] Loaded {} entities ({} unconfirmed kept)",
            entities.len(),
            unconfirmed.len()
        );
        state.entities = unconfirmed.into_iter().chain(entities).collect();
    }

    /// Apply a mutation to the cache immediately
    pub fn apply_optimistic(&self, mutation: Mutation) -> Result<MutationId> {
        self.apply_with(MutationId::new(), mutation, None, true)
    }

    /// Like [`apply_optimistic`](Self::apply_optimistic), reporting the
    /// outcome to `view` while it stays mounted
    pub fn apply_optimistic_for(&self, view: ViewId, mutation: Mutation) -> Result<MutationId> {
        self.apply_with(MutationId::new(), mutation, Some(view), true)
    }

    /// Wait until no mutation holds the entity, then apply
    pub async fn apply_when_settled(
        &self,
        mutation: Mutation,
        origin: Option<ViewId>,
    ) -> Result<MutationId> {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            match self.apply_with(MutationId::new(), mutation.clone(), origin, true) {
                Err(SyncError::EntityBusy(id)) => {
                    tracing::debug!("[Optimistic] {} busy, waiting for it to settle", id);
                    settled.await;
                }
                other => return other,
            }
        }
    }

    /// Re-apply a mutation recovered from the durable queue after a restart.
    ///
    /// The entity may not be cached yet, so absence is tolerated; a later
    /// `load_entities` fills in the snapshot.
    pub fn restore_queued(&self, mutation_id: MutationId, mutation: Mutation) -> Result<()> {
        self.apply_with(mutation_id, mutation, None, false).map(|_| ())
    }

    fn apply_with(
        &self,
        mutation_id: MutationId,
        mutation: Mutation,
        origin: Option<ViewId>,
        strict: bool,
    ) -> Result<MutationId> {
        let mut guard = self.state();
        let state = &mut *guard;
        let id = mutation.entity_id().clone();
        if state.locks.contains_key(&id) {
            return Err(SyncError::EntityBusy(id));
        }

        let snapshot = match &mutation {
            Mutation::Create { entity } => {
                if state.position(&id).is_some() {
                    if strict {
                        return Err(SyncError::conflict(format!("{} already exists", id)));
                    }
                } else {
                    state.entities.insert(0, entity.clone());
                }
                Snapshot::default()
            }
            Mutation::Update { fields, .. } => match state.position(&id) {
                Some(index) => {
                    let snapshot = Snapshot::capture(&state.entities, index);
                    state.entities[index].merge_fields(fields);
                    snapshot
                }
                None if strict => return Err(SyncError::EntityNotFound(id)),
                None => Snapshot::default(),
            },
            Mutation::Delete { .. } => {
                let index = state.position(&id);
                if index.is_none() && strict {
                    return Err(SyncError::EntityNotFound(id));
                }
                // In-flight first, then remove.
                state.in_flight.insert(id.clone());
                match index {
                    Some(index) => {
                        let snapshot = Snapshot::capture(&state.entities, index);
                        state.entities.remove(index);
                        snapshot
                    }
                    None => Snapshot::default(),
                }
            }
        };

        tracing::debug!(
            "[Optimistic] Applied {} to {} ({})",
            mutation_kind(&mutation),
            id,
            mutation_id
        );
        state.locks.insert(id, mutation_id);
        state.pending.insert(
            mutation_id,
            PendingMutation {
                mutation,
                snapshot,
                origin,
                adopted_as: None,
            },
        );
        Ok(mutation_id)
    }

    /// The remote call succeeded; the optimistic state becomes the truth.
    ///
    /// `server` is the backend's copy of the entity, when it sent one. For a
    /// creation it replaces the temporary entry in place.
    pub fn confirm(&self, mutation_id: MutationId, server: Option<CacheEntity>) -> Result<()> {
        let (origin, entity_id) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let pending = state
                .pending
                .remove(&mutation_id)
                .ok_or(SyncError::UnknownMutation(mutation_id))?;
            state.locks.retain(|_, holder| *holder != mutation_id);

            let entity_id = match &pending.mutation {
                Mutation::Create { entity } => {
                    let final_id = server
                        .as_ref()
                        .map(|record| record.id.clone())
                        .or(pending.adopted_as.clone())
                        .unwrap_or_else(|| entity.id.clone());
                    state.settle_create(&entity.id, server);
                    final_id
                }
                Mutation::Update { id, .. } => {
                    if let Some(record) = server {
                        state.merge_newer(record);
                    }
                    id.clone()
                }
                Mutation::Delete { id } => {
                    state.in_flight.remove(id);
                    if let Some(i) = state.position(id) {
                        state.entities.remove(i);
                    }
                    state.tombstones.insert(id.clone());
                    id.clone()
                }
            };
            (pending.origin, entity_id)
        };

        tracing::debug!("[Optimistic] Confirmed {} on {}", mutation_id, entity_id);
        self.notify_view(
            origin,
            ViewEvent::Confirmed {
                mutation_id,
                entity_id,
            },
        );
        self.settled.notify_waiters();
        Ok(())
    }

    /// The remote call failed; restore the snapshot and report `cause`
    pub fn rollback(&self, mutation_id: MutationId, cause: SyncError) -> Result<()> {
        let (origin, entity_id, already_remote) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let pending = state
                .pending
                .remove(&mutation_id)
                .ok_or(SyncError::UnknownMutation(mutation_id))?;
            state.locks.retain(|_, holder| *holder != mutation_id);
            let PendingMutation {
                mutation,
                snapshot,
                origin,
                adopted_as,
            } = pending;

            match mutation {
                Mutation::Create { entity } => {
                    if adopted_as.is_none() {
                        if let Some(i) = state.position(&entity.id) {
                            state.entities.remove(i);
                        }
                    }
                    let already_remote = adopted_as.is_some();
                    (origin, adopted_as.unwrap_or(entity.id), already_remote)
                }
                Mutation::Update { id, .. } => {
                    if !snapshot.removed_remotely {
                        if let Some(previous) = snapshot.entity.clone() {
                            match state.position(&id) {
                                Some(i) => state.entities[i] = previous,
                                None if !state.tombstones.contains(&id) => {
                                    let at = snapshot.restore_position(&state.entities);
                                    state.entities.insert(at, previous);
                                }
                                None => {}
                            }
                        }
                    }
                    (origin, id, false)
                }
                Mutation::Delete { id } => {
                    state.in_flight.remove(&id);
                    if snapshot.removed_remotely {
                        state.tombstones.insert(id.clone());
                    } else if let Some(previous) = snapshot.entity.clone() {
                        if state.position(&id).is_none() {
                            let at = snapshot.restore_position(&state.entities);
                            state.entities.insert(at, previous);
                        }
                    }
                    (origin, id, snapshot.removed_remotely)
                }
            }
        };

        if already_remote {
            // The push channel already showed the change landed remotely.
            tracing::warn!(
                "[Optimistic] {} failed after its echo arrived, keeping {}: {}",
                mutation_id,
                entity_id,
                cause
            );
            self.notify_view(
                origin,
                ViewEvent::Confirmed {
                    mutation_id,
                    entity_id,
                },
            );
            self.settled.notify_waiters();
            return Ok(());
        }

        tracing::warn!(
            "[Optimistic] Rolled back {} on {}: {}",
            mutation_id,
            entity_id,
            cause
        );
        let error = UserError::new(Some(mutation_id), Some(entity_id.clone()), cause);
        self.notify_view(
            origin,
            ViewEvent::RolledBack {
                mutation_id,
                entity_id,
                message: error.message.clone(),
            },
        );
        self.report(error);
        self.settled.notify_waiters();
        Ok(())
    }

    /// Broadcast a user-visible error
    pub fn report(&self, error: UserError) {
        // No receivers just means nobody is listening right now.
        let _ = self.errors.send(error);
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<UserError> {
        self.errors.subscribe()
    }

    /// Mount a view scope reading from this controller
    pub fn mount_view(self: &Arc<Self>) -> ViewScope {
        ViewScope::mount(Arc::clone(self))
    }

    pub(crate) fn register_view(&self) -> (ViewId, mpsc::UnboundedReceiver<ViewEvent>) {
        let id = ViewId::new(self.next_view.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (id, rx)
    }

    pub(crate) fn unregister_view(&self, id: ViewId) {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn notify_view(&self, origin: Option<ViewId>, event: ViewEvent) {
        let Some(view) = origin else {
            return;
        };
        let views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        match views.get(&view) {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => tracing::debug!("[Optimistic] View {:?} gone, dropping {:?}", view, event),
        }
    }
}

impl OutcomeListener for OptimisticController {
    fn on_outcome(&self, outcome: SyncOutcome) {
        let SyncOutcome {
            action_id,
            mutation_id,
            entity_id,
            result,
            ..
        } = outcome;

        match (mutation_id, result) {
            (Some(mutation_id), Ok(server)) => {
                if let Err(e) = self.confirm(mutation_id, server) {
                    tracing::debug!("[Optimistic] Action {} confirmed without local state: {}", action_id, e);
                }
            }
            (Some(mutation_id), Err(cause)) => {
                if let Err(SyncError::UnknownMutation(_)) = self.rollback(mutation_id, cause.clone()) {
                    self.report(UserError::new(Some(mutation_id), entity_id, cause));
                }
            }
            (None, Ok(_)) => {}
            (None, Err(cause)) => self.report(UserError::new(None, entity_id, cause)),
        }
    }
}

fn mutation_kind(mutation: &Mutation) -> &'static str {
    match mutation {
        Mutation::Create { .. } => "create",
        Mutation::Update { .. } => "update",
        Mutation::Delete { .. } => "delete",
    }
}
