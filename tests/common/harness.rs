//! Offline manager wired to in-process collaborators

use super::mock_executor::MockExecutor;
use prayersync::local_db::{KeyValueStore, MemoryStore};
use prayersync::offline::{BroadcastPushChannel, Collaborators, OfflineManager};
use prayersync::shared::SyncConfig;
use prayersync::sync::{NetworkMonitor, NetworkStatus};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub manager: OfflineManager,
    pub executor: Arc<MockExecutor>,
    pub push: Arc<BroadcastPushChannel>,
    pub monitor: Arc<NetworkMonitor>,
}

/// Default limits with every backoff delay at zero
pub fn fast_config() -> SyncConfig {
    SyncConfig::builder()
        .backoff(Duration::ZERO, Duration::ZERO, Duration::ZERO)
        .build()
        .unwrap()
}

pub fn harness(executor: MockExecutor, online: bool) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), executor, online)
}

pub fn harness_with_store(store: Arc<dyn KeyValueStore>, executor: MockExecutor, online: bool) -> Harness {
    let executor = Arc::new(executor);
    let push = Arc::new(BroadcastPushChannel::new(64));
    let status = if online {
        NetworkStatus::Online
    } else {
        NetworkStatus::Offline
    };
    let monitor = Arc::new(NetworkMonitor::new(status));

    let manager = OfflineManager::new(
        fast_config(),
        "prayers",
        Collaborators {
            store,
            executor: executor.clone(),
            push: push.clone(),
            monitor: monitor.clone(),
        },
    );

    Harness {
        manager,
        executor,
        push,
        monitor,
    }
}
