//! Queue durability across a process restart

use crate::common::*;
use prayersync::local_db::LocalDatabase;
use prayersync::offline::Lookup;
use prayersync::shared::{CacheEntity, EntityId, Mutation};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_restart_replays_each_action_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let temp = EntityId::temporary();

    let queued: Vec<Uuid> = {
        let db = Arc::new(LocalDatabase::open(&path).await.unwrap());
        let h = harness_with_store(db.clone(), MockExecutor::succeeding(), false);
        h.manager.load_entities(prayers(&["a", "b", "c"]));

        h.manager.submit(Mutation::Delete { id: "b".into() }).await.unwrap();
        h.manager
            .submit(Mutation::Create {
                entity: CacheEntity::new(temp.clone(), 0, fields(json!({"title": "New"}))),
            })
            .await
            .unwrap();
        h.manager
            .record_interaction("prayer_interactions", json!({"prayer_id": "a"}))
            .await
            .unwrap();

        let ids = h.manager.queue().list_pending().await.unwrap().iter().map(|a| a.id).collect();
        drop(h);
        db.pool().close().await;
        ids
    };
    assert_eq!(queued.len(), 3);

    let db = Arc::new(LocalDatabase::open(&path).await.unwrap());
    let h = harness_with_store(db, MockExecutor::succeeding(), false);
    assert_eq!(h.manager.recover().await.unwrap(), 2);
    h.manager.load_entities(prayers(&["a", "b", "c"]));

    // Local intent from the previous session is still visible
    assert_eq!(ids(&h.manager.entities()), vec![temp.as_str(), "a", "c"]);
    assert_eq!(h.manager.lookup(&"b".into()), Lookup::Pending);

    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();
    h.manager.sync_now().await.unwrap();

    let replayed: Vec<Uuid> = h.executor.calls().iter().map(|a| a.id).collect();
    assert_eq!(replayed, queued);
    assert_eq!(h.manager.queue_stats().await.unwrap().pending, 0);
    assert_eq!(h.manager.lookup(&"b".into()), Lookup::Deleted);
}

#[tokio::test]
async fn test_failed_actions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");

    {
        let db = Arc::new(LocalDatabase::open(&path).await.unwrap());
        let h = harness_with_store(
            db.clone(),
            MockExecutor::with_fallback(Err(prayersync::SyncError::unauthorized("no"))),
            true,
        );
        h.manager.load_entities(prayers(&["a"]));
        h.manager.submit(Mutation::Delete { id: "a".into() }).await.unwrap();
        h.manager.sync_now().await.unwrap();
        drop(h);
        db.pool().close().await;
    }

    let db = Arc::new(LocalDatabase::open(&path).await.unwrap());
    let h = harness_with_store(db, MockExecutor::succeeding(), true);
    assert_eq!(h.manager.recover().await.unwrap(), 0);
    let failed = h.manager.failed_actions().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].last_error.as_deref().is_some_and(|e| e.contains("no")));
}
