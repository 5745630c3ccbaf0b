//! # Sync Metrics
//!
//! Counters for drain cycles and action outcomes.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub total_drains: u64,
    pub actions_succeeded: u64,
    pub actions_retried: u64,
    pub actions_failed: u64,
    pub average_drain_duration: Duration,
    pub last_drain_duration: Option<Duration>,
    last_drain_start: Option<Instant>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drain_start(&mut self) {
        self.last_drain_start = Some(Instant::now());
        self.total_drains += 1;
    }

    pub fn record_drain_end(&mut self) {
        if let Some(start) = self.last_drain_start.take() {
            let duration = start.elapsed();
            self.last_drain_duration = Some(duration);

            // Rolling average over completed drains
            let completed = self.total_drains.max(1) as u32;
            let total = self.average_drain_duration * (completed - 1) + duration;
            self.average_drain_duration = total / completed;
        }
    }

    pub fn record_success(&mut self) {
        self.actions_succeeded += 1;
    }

    pub fn record_retry(&mut self) {
        self.actions_retried += 1;
    }

    pub fn record_failure(&mut self) {
        self.actions_failed += 1;
    }

    /// Share of settled actions that succeeded
    pub fn success_rate(&self) -> f64 {
        let settled = self.actions_succeeded + self.actions_failed;
        if settled == 0 {
            0.0
        } else {
            self.actions_succeeded as f64 / settled as f64
        }
    }
}
