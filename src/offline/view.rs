//! Mounted-view handle.
//!
//! A [`ViewScope`] is what a screen holds while it is on display. It owns the
//! screen's realtime subscriptions, receives the outcomes of mutations the
//! screen started, and applies the "not found" guard to single-entity reads.
//! Unmounting tears all of that down; mutations already queued keep running.

use crate::offline::optimistic::{Lookup, OptimisticController};
use crate::offline::reconciliation::SubscriptionHandle;
use crate::shared::entity::{EntityId, MutationId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity of a mounted view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl ViewId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Outcome of a mutation started by a view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Confirmed {
        mutation_id: MutationId,
        entity_id: EntityId,
    },
    RolledBack {
        mutation_id: MutationId,
        entity_id: EntityId,
        message: String,
    },
}

/// A mounted view
pub struct ViewScope {
    id: ViewId,
    controller: Arc<OptimisticController>,
    events: mpsc::UnboundedReceiver<ViewEvent>,
    subscriptions: Vec<SubscriptionHandle>,
    unmounting: AtomicBool,
}

impl std::fmt::Debug for ViewScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewScope")
            .field("id", &self.id)
            .field("subscriptions", &self.subscriptions.len())
            .field("unmounting", &self.is_unmounting())
            .finish()
    }
}

impl ViewScope {
    pub(crate) fn mount(controller: Arc<OptimisticController>) -> Self {
        let (id, events) = controller.register_view();
        tracing::debug!("[View] Mounted {:?}", id);
        Self {
            id,
            controller,
            events,
            subscriptions: Vec::new(),
            unmounting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    /// Tie a realtime subscription to this view's lifetime
    pub fn attach(&mut self, subscription: SubscriptionHandle) {
        self.subscriptions.push(subscription);
    }

    /// Read one entity for display.
    ///
    /// Absence during unmount reads as [`Lookup::Detached`] rather than
    /// [`Lookup::NotFound`], so a screen leaving after its own delete never
    /// flashes an error.
    pub fn lookup(&self, id: &EntityId) -> Lookup {
        match self.controller.lookup(id) {
            Lookup::NotFound if self.is_unmounting() => Lookup::Detached,
            other => other,
        }
    }

    /// Mark the view as leaving the screen
    pub fn begin_unmount(&self) {
        self.unmounting.store(true, Ordering::SeqCst);
    }

    pub fn is_unmounting(&self) -> bool {
        self.unmounting.load(Ordering::SeqCst)
    }

    /// Next outcome for a mutation this view started
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ViewEvent> {
        self.events.try_recv().ok()
    }

    /// Tear down subscriptions and stop receiving outcomes
    pub async fn unmount(mut self) {
        self.begin_unmount();
        self.controller.unregister_view(self.id);
        for subscription in std::mem::take(&mut self.subscriptions) {
            subscription.unsubscribe().await;
        }
        tracing::debug!("[View] Unmounted {:?}", self.id);
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.controller.unregister_view(self.id);
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
    }
}
