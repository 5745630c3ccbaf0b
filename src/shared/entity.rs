//! Cache entities and the mutations applied to them.
//!
//! A [`CacheEntity`] is the locally displayed copy of a remote record. Its
//! `version` is the server's monotonically increasing change marker and is
//! what realtime reconciliation compares against.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

const TEMP_PREFIX: &str = "tmp-";

/// Identity of a cached entity.
///
/// Server-assigned once known; `tmp-<uuid>` for creations the server has not
/// confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh client-side id for an unconfirmed creation
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of one optimistic mutation (not of the entity it touches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Locally displayed representation of a domain object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntity {
    /// Server id, or a temporary id for unconfirmed creations
    pub id: EntityId,
    /// Server change marker; 0 for entities the server has never seen
    pub version: i64,
    /// Domain fields
    pub fields: Map<String, Value>,
}

impl CacheEntity {
    pub fn new(id: impl Into<EntityId>, version: i64, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            version,
            fields,
        }
    }

    /// Overwrite the given fields, leaving the rest untouched
    pub fn merge_fields(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A user-initiated change applied optimistically to the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Insert a new entity (normally with a temporary id)
    Create { entity: CacheEntity },
    /// Overwrite some fields of an existing entity
    Update {
        id: EntityId,
        fields: Map<String, Value>,
    },
    /// Remove an entity
    Delete { id: EntityId },
}

impl Mutation {
    /// The entity this mutation targets
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Mutation::Create { entity } => &entity.id,
            Mutation::Update { id, .. } => id,
            Mutation::Delete { id } => id,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Mutation::Delete { .. })
    }
}
