//! # Drain Scheduler
//!
//! Decides when the durable queue should be drained and which actions are
//! due in a given cycle.
//!
//! ## Features
//!
//! - **Periodic Drains**: catch actions enqueued mid-session while online
//! - **Backoff Awareness**: an action is skipped until its persisted backoff
//!   has elapsed
//! - **Wake-up Planning**: the next wake-up is the earlier of the periodic
//!   interval and the first action coming due

use crate::offline::queue::QueuedAction;
use crate::offline::retry::RetryPolicy;
use crate::shared::entity::EntityId;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;

/// Drain timing
#[derive(Debug)]
pub struct DrainScheduler {
    /// Periodic interval while online
    interval: Duration,
    /// Backoff between attempts of one action
    policy: RetryPolicy,
}

impl DrainScheduler {
    pub fn new(interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            interval,
            policy,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether `action` may be attempted at `now`
    pub fn is_due(&self, action: &QueuedAction, now: DateTime<Utc>) -> bool {
        self.policy.is_due(action, now)
    }

    /// How long to sleep before the next drain is worth running.
    ///
    /// Only the first pending action of each entity counts: later ones cannot
    /// run before it settles, however long ago they were queued.
    pub fn next_wakeup(&self, pending: &[QueuedAction], now: DateTime<Utc>) -> Duration {
        let mut heads: HashSet<EntityId> = HashSet::new();
        pending
            .iter()
            .filter(|action| match &action.entity_id {
                Some(id) => heads.insert(id.clone()),
                None => true,
            })
            .map(|action| self.due_in(action, now))
            .min()
            .map_or(self.interval, |soonest| soonest.min(self.interval))
    }

    fn due_in(&self, action: &QueuedAction, now: DateTime<Utc>) -> Duration {
        match action.last_attempt_at {
            Some(last) if action.attempt_count > 0 => {
                match chrono::Duration::from_std(self.policy.delay_for(action.attempt_count)) {
                    Ok(delay) => (last + delay - now).to_std().unwrap_or(Duration::ZERO),
                    Err(_) => self.interval,
                }
            }
            _ => Duration::ZERO,
        }
    }
}
