//! # Retry Logic and Backoff Strategies
//!
//! Backoff policy shared by the durable queue and the direct
//! ("fire-and-confirm") path.
//!
//! ## Features
//!
//! - **Exponential Backoff**: 1s, 2s, 4s ... up to a cap
//! - **Jitter**: optional randomness on direct retries so clients reconnecting
//!   together do not hit the backend in lockstep
//! - **Max Attempts**: a hard attempt cap after which the failure is final
//! - **Persisted Schedule**: queue backoff is computed from the action's stored
//!   `attempt_count` and `last_attempt_at`, so it survives restarts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use prayersync::offline::retry::{retry_with_backoff, RetryPolicy};
//! use prayersync::shared::config::SyncConfig;
//!
//! # async fn example() -> prayersync::Result<()> {
//! let policy = RetryPolicy::direct(&SyncConfig::default());
//! let value = retry_with_backoff(&policy, |_attempt| async { Ok::<_, prayersync::SyncError>(42) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::offline::queue::QueuedAction;
use crate::shared::config::SyncConfig;
use crate::shared::error::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        interval: Duration,
    },
    /// Exponential backoff with jitter
    Exponential {
        /// Delay before the second attempt
        base: Duration,
        /// Upper bound for any single delay, jitter included
        max: Duration,
        /// Jitter factor (0.0 to 1.0)
        jitter: f64,
    },
}

/// Attempt cap plus backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            strategy,
        }
    }

    /// Policy for direct network calls: doubling from `base_delay`, capped
    /// at `direct_max_delay`, with 10% jitter
    pub fn direct(config: &SyncConfig) -> Self {
        Self::new(
            config.max_attempts,
            BackoffStrategy::Exponential {
                base: config.base_delay,
                max: config.direct_max_delay,
                jitter: 0.1,
            },
        )
    }

    /// Policy spacing durable queue attempts across drain cycles.
    ///
    /// No jitter: the schedule is recomputed from persisted state on every
    /// drain and must give the same answer each time.
    pub fn queue(config: &SyncConfig) -> Self {
        Self::new(
            config.max_attempts,
            BackoffStrategy::Exponential {
                base: config.base_delay,
                max: config.queue_max_delay,
                jitter: 0.0,
            },
        )
    }

    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            BackoffStrategy::Fixed {
                interval: Duration::ZERO,
            },
        )
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.strategy {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Exponential { base, max, jitter } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = base.saturating_mul(1u32 << exponent).min(*max);
                if *jitter > 0.0 {
                    let factor = rand::thread_rng().gen_range(0.0..*jitter);
                    (delay + delay.mul_f64(factor)).min(*max)
                } else {
                    delay
                }
            }
        }
    }

    /// Whether the attempt cap has been reached
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }

    /// Whether a queued action's backoff has elapsed at `now`
    pub fn is_due(&self, action: &QueuedAction, now: DateTime<Utc>) -> bool {
        let Some(last) = action.last_attempt_at else {
            return true;
        };
        if action.attempt_count == 0 {
            return true;
        }
        match chrono::Duration::from_std(self.delay_for(action.attempt_count)) {
            Ok(delay) => last + delay <= now,
            Err(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || policy.is_exhausted(attempt) => {
                tracing::debug!("[Retry] Giving up after attempt {}: {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    "[Retry] Attempt {} failed ({}), retrying in {:?}",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
