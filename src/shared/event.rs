/**
 * Realtime Change Events
 *
 * This module defines the notifications delivered by the push channel.
 * Each event describes one insert, update or delete of a remote entity
 * together with the version the change produced.
 *
 * Delivery is at-least-once and may be reordered relative to the remote
 * executor's own confirmations, so consumers compare `version` before
 * applying anything.
 */
use crate::shared::entity::{CacheEntity, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of remote change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Remote change notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    /// Channel (table or topic) the change belongs to
    pub channel: String,
    /// Entity the change applies to
    pub entity_id: EntityId,
    /// Insert, update or delete
    pub change_type: ChangeType,
    /// Version of the entity after the change
    pub version: i64,
    /// Changed fields (full row for inserts, empty for deletes)
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// When the change was committed remotely
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        channel: impl Into<String>,
        entity_id: impl Into<EntityId>,
        change_type: ChangeType,
        version: i64,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            channel: channel.into(),
            entity_id: entity_id.into(),
            change_type,
            version,
            fields,
            committed_at: Utc::now(),
        }
    }

    /// Temporary id of the local creation this insert confirms, if the
    /// server echoed one back
    pub fn client_ref(&self) -> Option<EntityId> {
        self.fields
            .get("client_ref")
            .and_then(Value::as_str)
            .map(EntityId::new)
    }

    /// The entity as described by this event
    pub fn to_entity(&self) -> CacheEntity {
        let mut fields = self.fields.clone();
        fields.remove("client_ref");
        CacheEntity::new(self.entity_id.clone(), self.version, fields)
    }
}

/// Selects the change events a view subscribes to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    /// Channel name, e.g. `prayers`
    pub channel: String,
    /// Optional `field = value` restriction, e.g. `group_id = 7`
    pub field_equals: Option<(String, Value)>,
}

impl ChangeFilter {
    /// Every change on a channel
    pub fn all(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            field_equals: None,
        }
    }

    /// Changes whose `field` equals `value`
    pub fn field(channel: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self {
            channel: channel.into(),
            field_equals: Some((field.into(), value)),
        }
    }

    /// Whether the event passes this filter.
    ///
    /// Deletes carry no fields, so the field restriction only applies to
    /// inserts and updates.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.channel != self.channel {
            return false;
        }
        match (&self.field_equals, event.change_type) {
            (None, _) | (Some(_), ChangeType::Delete) => true,
            (Some((field, value)), _) => event.fields.get(field) == Some(value),
        }
    }

    /// Stable key used to persist this filter's sync cursor
    pub fn key(&self) -> String {
        match &self.field_equals {
            None => self.channel.clone(),
            Some((field, value)) => format!("{}:{}={}", self.channel, field, value),
        }
    }
}

/// Marker of the most recent remote change already incorporated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncCursor {
    pub committed_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(committed_at: DateTime<Utc>) -> Self {
        Self { committed_at }
    }

    /// Move forward to `event` if it is newer
    pub fn advance(self, event: &ChangeEvent) -> Self {
        if event.committed_at > self.committed_at {
            Self::new(event.committed_at)
        } else {
            self
        }
    }
}
