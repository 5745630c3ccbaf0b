//! Shared Module
//!
//! Types used across the sync engine: cached entities and mutations, remote
//! change events, errors and configuration.
//!
//! # Overview
//!
//! Everything here is plain data designed for serialization, either into
//! the local store or over the wire to the backend.

/// Cached entities, ids and mutations
pub mod entity;

/// Remote change notifications
pub mod event;

/// Shared error types
pub mod error;

/// Engine configuration
pub mod config;

/// Prayer request domain types
pub mod prayer;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use entity::{CacheEntity, EntityId, Mutation, MutationId};
pub use error::{Result, SyncError};
pub use event::{ChangeEvent, ChangeFilter, ChangeType, SyncCursor};
