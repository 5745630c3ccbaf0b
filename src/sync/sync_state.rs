//! # Sync State
//!
//! Observable snapshot of what the drain loop is doing.

use crate::sync::network_monitor::NetworkStatus;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub is_draining: bool,
    pub last_drain: Option<DateTime<Utc>>,
    pub pending_actions: usize,
    pub failed_actions: usize,
    pub network_status: NetworkStatus,
    /// Most recent execution error, cleared by a clean drain
    pub last_error: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            is_draining: false,
            last_drain: None,
            pending_actions: 0,
            failed_actions: 0,
            network_status: NetworkStatus::Offline,
            last_error: None,
        }
    }
}
