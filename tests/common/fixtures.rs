//! Entity and event fixtures

use prayersync::shared::{CacheEntity, ChangeEvent, ChangeType};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;

pub fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// A prayer entity titled after its id
pub fn prayer(id: &str, version: i64) -> CacheEntity {
    CacheEntity::new(id, version, fields(json!({ "title": format!("Prayer {}", id) })))
}

pub fn prayers(ids: &[&str]) -> Vec<CacheEntity> {
    ids.iter().map(|id| prayer(id, 1)).collect()
}

pub fn ids(entities: &[CacheEntity]) -> Vec<String> {
    entities.iter().map(|e| e.id.as_str().to_string()).collect()
}

pub fn event(id: &str, change_type: ChangeType, version: i64, value: Value) -> ChangeEvent {
    ChangeEvent::new("prayers", id, change_type, version, fields(value))
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 2s");
}
