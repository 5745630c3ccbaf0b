//! Remote execution contract and outcome classification.
//!
//! The scheduler and the direct path both run actions through a
//! [`RemoteExecutor`], classify the result, and report final outcomes upward
//! to an [`OutcomeListener`] (the optimistic controller). Nothing here renders
//! or decides rollback.

use crate::offline::queue::{ActionKind, QueuedAction};
use crate::shared::entity::{CacheEntity, EntityId, MutationId};
use crate::shared::error::{Result, SyncError};
use async_trait::async_trait;
use uuid::Uuid;

/// Executes queued actions against the backend.
///
/// Implementations must be idempotent per `action.id` (or rely on remote
/// uniqueness constraints), since delivery is at-least-once.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run the action; returns the server's copy of the entity when the
    /// backend sends one back
    async fn execute(&self, action: &QueuedAction) -> Result<Option<CacheEntity>>;
}

/// What to do with an action after one execution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Remove from the queue and confirm
    Succeeded(Option<CacheEntity>),
    /// Keep queued and try again later
    Retry(SyncError),
    /// Never retry; remove and report
    Failed(SyncError),
}

/// Classify the result of executing an action of `kind`.
///
/// A conflict means the remote side already reflects the change (a replayed
/// create absorbed by a unique constraint, a delete of something already
/// gone), so it counts as success everywhere except updates, where it means
/// the entity changed underneath us.
pub fn classify(kind: ActionKind, result: Result<Option<CacheEntity>>) -> ExecOutcome {
    match result {
        Ok(entity) => ExecOutcome::Succeeded(entity),
        Err(SyncError::Conflict { message }) if kind != ActionKind::UpdateEntity => {
            tracing::debug!("[Sync] {:?} conflict treated as success: {}", kind, message);
            ExecOutcome::Succeeded(None)
        }
        Err(e) if e.is_retryable() => ExecOutcome::Retry(e),
        Err(e) => {
            if matches!(e, SyncError::Malformed { .. } | SyncError::Serialization { .. }) {
                tracing::error!("[Sync] Defect: {:?} action cannot be replayed: {}", kind, e);
            }
            ExecOutcome::Failed(e)
        }
    }
}

/// Final result of an action, reported once
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub mutation_id: Option<MutationId>,
    pub entity_id: Option<EntityId>,
    pub result: std::result::Result<Option<CacheEntity>, SyncError>,
}

impl SyncOutcome {
    pub fn new(action: &QueuedAction, result: std::result::Result<Option<CacheEntity>, SyncError>) -> Self {
        Self {
            action_id: action.id,
            kind: action.kind,
            mutation_id: action.mutation_id,
            entity_id: action.entity_id.clone(),
            result,
        }
    }
}

/// Receives final action outcomes
pub trait OutcomeListener: Send + Sync {
    fn on_outcome(&self, outcome: SyncOutcome);
}
