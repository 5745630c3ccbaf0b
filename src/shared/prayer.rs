//! Prayer records, the entity the app's feeds display.

use crate::shared::entity::{CacheEntity, EntityId, Mutation};
use crate::shared::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A prayer request as shown in a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prayer {
    pub id: EntityId,
    pub author_id: String,
    pub group_id: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub is_answered: bool,
    #[serde(default)]
    pub prayer_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

/// Fields the user fills in when posting a prayer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrayerDraft {
    pub author_id: String,
    pub group_id: Option<String>,
    pub title: String,
    pub body: String,
}

impl PrayerDraft {
    /// Optimistic creation of this draft under a temporary id
    pub fn into_mutation(self) -> Result<Mutation> {
        if self.title.trim().is_empty() {
            return Err(SyncError::validation("title", "Title cannot be empty"));
        }
        let prayer = Prayer {
            id: EntityId::temporary(),
            author_id: self.author_id,
            group_id: self.group_id,
            title: self.title,
            body: self.body,
            is_answered: false,
            prayer_count: 0,
            created_at: Utc::now(),
            version: 0,
        };
        Ok(Mutation::Create {
            entity: prayer.into_entity()?,
        })
    }
}

impl Prayer {
    pub fn into_entity(self) -> Result<CacheEntity> {
        let id = self.id.clone();
        let version = self.version;
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.remove("id");
        fields.remove("version");
        Ok(CacheEntity::new(id, version, fields))
    }

    pub fn from_entity(entity: &CacheEntity) -> Result<Self> {
        let mut fields = entity.fields.clone();
        fields.insert("id".into(), Value::String(entity.id.to_string()));
        fields.insert("version".into(), Value::from(entity.version));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

/// Mutation marking a prayer as answered
pub fn mark_answered(id: EntityId) -> Mutation {
    let mut fields = Map::new();
    fields.insert("is_answered".into(), Value::Bool(true));
    Mutation::Update { id, fields }
}
