//! Shared Error Types
//!
//! Every failure the sync engine can report flows through [`SyncError`].
//! Lower layers (queue, scheduler, executors) return it upward; only the
//! optimistic controller turns it into a user-visible [`UserError`].
//!
//! # Error Categories
//!
//! - **Transient**: `Network`, `Offline` - retried up to the attempt cap
//! - **Permanent**: `Unauthorized`, `Validation`, `Malformed` - never retried
//! - **Conflict**: the remote entity changed or vanished underneath us
//! - **Local**: `Storage`, `Serialization`, `EntityBusy`, `EntityNotFound`
//!
//! # Usage
//!
//! ```rust
//! use prayersync::shared::error::SyncError;
//!
//! let error = SyncError::network("connection reset");
//! assert!(error.is_retryable());
//! assert_eq!(error.user_message(), "Network error");
//! ```
//!
//! [`UserError`]: crate::offline::optimistic::UserError
use crate::shared::entity::{EntityId, MutationId};
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the sync engine and its collaborators
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transport failure, timeout or 5xx response
    #[error("Network error: {message}")]
    Network {
        /// Human-readable error message
        message: String,
    },

    /// The device is known to be offline
    #[error("Offline")]
    Offline,

    /// The backend rejected the caller's credentials or permissions
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Human-readable error message
        message: String,
    },

    /// The backend rejected the payload as invalid
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// The action payload cannot be replayed (a client defect)
    #[error("Malformed payload: {message}")]
    Malformed {
        /// Human-readable error message
        message: String,
    },

    /// The remote entity is gone or newer than the mutation expected
    #[error("Conflict: {message}")]
    Conflict {
        /// Human-readable error message
        message: String,
    },

    /// Persistent store failure
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// JSON serialization or deserialization failure
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// The entity already has a pending optimistic mutation
    #[error("Entity {0} has a pending change")]
    EntityBusy(EntityId),

    /// The entity is not in the cache
    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    /// No pending mutation with this id
    #[error("Unknown mutation {0}")]
    UnknownMutation(MutationId),
}

impl SyncError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new authorization error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new malformed-payload error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether replaying the same action later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Offline)
    }

    /// Whether the caller should refresh before trying again
    pub fn requires_refresh(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Short cause suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { .. } | Self::Offline => "Network error".to_string(),
            Self::Unauthorized { .. } => "Not authorized".to_string(),
            Self::Validation { message, .. } => message.clone(),
            Self::Malformed { .. } | Self::Serialization { .. } => {
                "Something went wrong saving your change".to_string()
            }
            Self::Conflict { .. } => {
                "This prayer was changed elsewhere. Refresh and try again.".to_string()
            }
            Self::Storage { .. } => "Could not save your change on this device".to_string(),
            Self::EntityBusy(_) => "Please wait for the previous change to finish".to_string(),
            Self::EntityNotFound(_) => "This prayer no longer exists".to_string(),
            Self::UnknownMutation(_) => "Unknown change".to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}
