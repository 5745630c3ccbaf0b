//! # Network Monitor
//!
//! Tracks device reachability and emits online/offline transitions.
//!
//! ## Features
//!
//! - **Connectivity Detection**: current online/offline status
//! - **Transition Events**: `BecameOnline` / `BecameOffline` on change only
//! - **Re-checks**: the platform signal is a hint; after an inconclusive
//!   failure the scheduler asks a [`ReachabilityProbe`] instead of trusting it

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

/// Reachability transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

/// Active reachability check, e.g. a cheap request to the backend
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

pub struct NetworkMonitor {
    status: watch::Sender<NetworkStatus>,
    events: broadcast::Sender<ConnectivityEvent>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("status", &self.status())
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            status,
            events,
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Feed the platform reachability signal.
    ///
    /// Returns the transition it caused, if any.
    pub fn set_reachable(&self, reachable: bool) -> Option<ConnectivityEvent> {
        let next = if reachable {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return None;
        }

        let event = match next {
            NetworkStatus::Online => ConnectivityEvent::BecameOnline,
            NetworkStatus::Offline => ConnectivityEvent::BecameOffline,
        };
        tracing::info!("[Network] {:?}", event);
        let _ = self.events.send(event);
        Some(event)
    }

    /// Transition events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Confirm reachability after a failed call.
    ///
    /// With a probe the answer comes from the probe and is fed back into the
    /// monitor; without one the current hint stands.
    pub async fn recheck(&self) -> bool {
        match &self.probe {
            Some(probe) => {
                let reachable = probe.check().await;
                tracing::debug!("[Network] Re-check: reachable={}", reachable);
                self.set_reachable(reachable);
                reachable
            }
            None => self.is_online(),
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Offline)
    }
}
