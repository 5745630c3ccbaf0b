//! Durable queue draining against the remote executor

use crate::common::*;
use assert_matches::assert_matches;
use prayersync::offline::{ActionKind, Lookup};
use prayersync::shared::{CacheEntity, EntityId, Mutation};
use prayersync::SyncError;
use serde_json::json;

#[tokio::test]
async fn test_offline_create_drains_once_on_reconnect() {
    let server_copy = CacheEntity::new("p-1", 1, fields(json!({"title": "Exams"})));
    let h = harness(MockExecutor::with_fallback(Ok(Some(server_copy.clone()))), false);
    h.manager.start();

    let temp = EntityId::temporary();
    h.manager
        .submit(Mutation::Create {
            entity: CacheEntity::new(temp.clone(), 0, fields(json!({"title": "Exams"}))),
        })
        .await
        .unwrap();
    assert_eq!(h.executor.call_count(), 0);
    assert_matches!(h.manager.lookup(&temp), Lookup::Found(_));

    h.manager.set_reachable(true);
    let manager = &h.manager;
    eventually(|| async move { manager.queue_stats().await.unwrap().pending == 0 }).await;

    assert_eq!(h.executor.call_count(), 1);
    assert_eq!(h.manager.entities(), vec![server_copy.clone()]);
    // The temporary id keeps resolving after confirmation
    assert_eq!(h.manager.lookup(&temp), Lookup::Found(server_copy));
    h.manager.stop().await;
}

#[tokio::test]
async fn test_retry_cap_surfaces_exactly_one_error() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::network("timeout"))), true);
    h.manager.load_entities(prayers(&["a", "b"]));
    let mut errors = h.manager.subscribe_errors();

    h.manager.submit(Mutation::Delete { id: "b".into() }).await.unwrap();
    for _ in 0..5 {
        h.manager.sync_now().await.unwrap();
    }

    assert_eq!(h.executor.call_count(), 3);
    assert_eq!(ids(&h.manager.entities()), vec!["a", "b"]);
    let error = errors.try_recv().unwrap();
    assert_eq!(error.entity_id, Some("b".into()));
    assert_eq!(error.message, "Network error");
    assert!(errors.try_recv().is_err());

    let stats = h.manager.queue_stats().await.unwrap();
    assert_eq!((stats.pending, stats.failed), (0, 1));
}

#[tokio::test]
async fn test_authorization_failure_is_not_retried() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::unauthorized("expired token"))), true);
    h.manager.load_entities(prayers(&["a"]));
    let mut errors = h.manager.subscribe_errors();

    h.manager
        .submit(Mutation::Update {
            id: "a".into(),
            fields: fields(json!({"is_answered": true})),
        })
        .await
        .unwrap();
    let report = h.manager.sync_now().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.executor.call_count(), 1);
    assert_eq!(h.manager.entities(), prayers(&["a"]));
    assert_matches!(errors.try_recv().unwrap().cause, SyncError::Unauthorized { .. });
    assert_eq!(h.manager.queue_stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_actions_run_in_enqueue_order() {
    let h = harness(MockExecutor::succeeding(), false);
    h.manager.load_entities(prayers(&["a", "b"]));

    h.manager.submit(Mutation::Delete { id: "a".into() }).await.unwrap();
    h.manager
        .record_interaction("prayer_interactions", json!({"prayer_id": "b", "kind": "prayed"}))
        .await
        .unwrap();
    h.manager
        .submit(Mutation::Update {
            id: "b".into(),
            fields: fields(json!({"title": "Updated"})),
        })
        .await
        .unwrap();

    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();

    let kinds: Vec<ActionKind> = h.executor.calls().iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![ActionKind::DeleteEntity, ActionKind::RecordInteraction, ActionKind::UpdateEntity]
    );
}

#[tokio::test]
async fn test_interaction_failure_reports_without_rollback() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::validation("kind", "unknown"))), true);
    h.manager.load_entities(prayers(&["a"]));
    let mut errors = h.manager.subscribe_errors();

    h.manager
        .record_interaction("prayer_interactions", json!({"prayer_id": "a"}))
        .await
        .unwrap();
    h.manager.sync_now().await.unwrap();

    let error = errors.try_recv().unwrap();
    assert_eq!(error.mutation_id, None);
    assert_eq!(h.manager.entities(), prayers(&["a"]));
}

#[tokio::test]
async fn test_dismiss_failed_action() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::unauthorized("no"))), true);
    h.manager.load_entities(prayers(&["a"]));
    h.manager.submit(Mutation::Delete { id: "a".into() }).await.unwrap();
    h.manager.sync_now().await.unwrap();

    let failed = h.manager.failed_actions().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(h.manager.dismiss_failed(&failed[0].id).await.unwrap());
    assert_eq!(h.manager.queue_stats().await.unwrap().failed, 0);
}
