//! PrayerSync - Offline-Tolerant Sync Engine
//!
//! PrayerSync keeps a prayer-request feed usable without a network
//! connection. User changes show up immediately, persist locally until the
//! backend accepts them, and reconcile with realtime notifications from
//! other clients.
//!
//! # Overview
//!
//! This library provides:
//! - Optimistic cache updates with exactly-once rollback and error reporting
//! - A durable action queue that survives restarts
//! - Bounded retries with exponential backoff, drained in the background
//! - Realtime reconciliation that never resurrects deleted entities
//! - Per-view scopes whose teardown cancels their subscriptions
//!
//! # Module Structure
//!
//! - **`shared`** - Entities, mutations, change events, errors, configuration
//! - **`local_db`** - Persistent key-value store (SQLite via `sqlx`)
//! - **`offline`** - Optimistic controller, action queue, reconciliation,
//!   views, and the [`OfflineManager`](offline::OfflineManager) facade
//! - **`sync`** - Network monitor and the background drain loop
//! - **`client`** - HTTP executor and reachability probe
//!
//! # Usage
//!
//! ```rust,no_run
//! use prayersync::client::{HttpExecutor, HttpProbe};
//! use prayersync::local_db::LocalDatabase;
//! use prayersync::offline::{BroadcastPushChannel, Collaborators, OfflineManager};
//! use prayersync::shared::{ChangeFilter, SyncConfig};
//! use prayersync::sync::{NetworkMonitor, NetworkStatus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load("prayersync.toml")?;
//! let store = Arc::new(LocalDatabase::open(&config.database_path).await?);
//! let monitor = NetworkMonitor::new(NetworkStatus::Online)
//!     .with_probe(Arc::new(HttpProbe::new(&config)?));
//!
//! let manager = OfflineManager::new(
//!     config.clone(),
//!     "prayers",
//!     Collaborators {
//!         store,
//!         executor: Arc::new(HttpExecutor::new(config)?),
//!         push: Arc::new(BroadcastPushChannel::new(256)),
//!         monitor: Arc::new(monitor),
//!     },
//! );
//! manager.recover().await?;
//! manager.start();
//!
//! let mut feed = manager.mount_view();
//! manager.subscribe(&mut feed, ChangeFilter::all("prayers")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! The cache lives behind one lock shared by the optimistic controller and
//! the reconciler, so a merge and a rollback never interleave. Queue writes
//! are serialized by the queue itself. No lock is held across an await.
//!
//! # Error Handling
//!
//! Fallible operations return [`Result`] with a [`SyncError`]. Failures of
//! user mutations reach the UI once, as a
//! [`UserError`](offline::UserError) on
//! [`subscribe_errors`](offline::OfflineManager::subscribe_errors).

/// Shared types and data structures
pub mod shared;

/// Persistent key-value storage
pub mod local_db;

/// Optimistic updates, durable queue and reconciliation
pub mod offline;

/// Background queue draining and connectivity
pub mod sync;

/// Backend HTTP client
pub mod client;

pub use shared::error::{Result, SyncError};
