//! Optimistic updates, rollback, and the in-flight guard end to end

use crate::common::*;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use prayersync::offline::{ActionKind, Lookup};
use prayersync::shared::Mutation;
use prayersync::SyncError;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_failed_delete_restores_original_position() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::unauthorized("read only"))), false);
    h.manager.load_entities(prayers(&["a", "b", "c"]));
    let mut errors = h.manager.subscribe_errors();

    h.manager.submit(Mutation::Delete { id: "b".into() }).await.unwrap();
    assert_eq!(ids(&h.manager.entities()), vec!["a", "c"]);
    assert_eq!(h.manager.lookup(&"b".into()), Lookup::Pending);

    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();

    assert_eq!(h.manager.entities(), prayers(&["a", "b", "c"]));
    assert_eq!(h.manager.lookup(&"b".into()), Lookup::Found(prayer("b", 1)));
    assert_eq!(errors.try_recv().unwrap().entity_id, Some("b".into()));
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_confirmed_delete_is_never_resurrected() {
    let h = harness(MockExecutor::succeeding(), true);
    h.manager.load_entities(prayers(&["a", "b"]));

    h.manager.submit(Mutation::Delete { id: "a".into() }).await.unwrap();
    h.manager.sync_now().await.unwrap();
    assert_eq!(h.manager.lookup(&"a".into()), Lookup::Deleted);

    // A stale fetch still containing the deleted entity
    h.manager.load_entities(prayers(&["a", "b"]));
    assert_eq!(ids(&h.manager.entities()), vec!["b"]);
}

#[tokio::test]
async fn test_second_mutation_on_in_flight_entity_is_rejected() {
    let h = harness(MockExecutor::succeeding(), false);
    h.manager.load_entities(prayers(&["a"]));

    h.manager
        .submit(Mutation::Update {
            id: "a".into(),
            fields: fields(json!({"title": "First"})),
        })
        .await
        .unwrap();
    let second = h.manager.submit(Mutation::Delete { id: "a".into() }).await;

    assert_matches!(second, Err(SyncError::EntityBusy(_)));
    assert_eq!(h.manager.queue_stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_submit_when_settled_waits_for_the_first_mutation() {
    let h = harness(MockExecutor::succeeding(), false);
    h.manager.load_entities(prayers(&["a"]));
    h.manager
        .submit(Mutation::Update {
            id: "a".into(),
            fields: fields(json!({"title": "First"})),
        })
        .await
        .unwrap();

    let (second, _) = tokio::join!(
        h.manager.submit_when_settled(Mutation::Delete { id: "a".into() }, None),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.manager.set_reachable(true);
            h.manager.sync_now().await.unwrap();
        }
    );

    second.unwrap();
    h.manager.sync_now().await.unwrap();

    let kinds: Vec<_> = h.executor.calls().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![ActionKind::UpdateEntity, ActionKind::DeleteEntity]);
    assert_eq!(h.manager.lookup(&"a".into()), Lookup::Deleted);
}

#[tokio::test]
async fn test_conflicting_update_asks_for_refresh() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::conflict("row changed"))), true);
    h.manager.load_entities(prayers(&["a"]));
    let mut errors = h.manager.subscribe_errors();

    h.manager
        .submit(Mutation::Update {
            id: "a".into(),
            fields: fields(json!({"title": "Mine"})),
        })
        .await
        .unwrap();
    h.manager.sync_now().await.unwrap();

    assert!(errors.try_recv().unwrap().refresh_required);
    assert_eq!(h.manager.entities(), prayers(&["a"]));
}

#[tokio::test]
async fn test_rejected_create_disappears() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::validation("body", "too long"))), true);
    h.manager.load_entities(prayers(&["a"]));
    let draft = prayersync::shared::prayer::PrayerDraft {
        author_id: "user-1".into(),
        group_id: None,
        title: "Exam week".into(),
        body: "Please pray".into(),
    };
    let create = draft.into_mutation().unwrap();
    let temp = create.entity_id().clone();

    h.manager.submit(create).await.unwrap();
    assert_eq!(h.manager.entities().len(), 2);

    h.manager.sync_now().await.unwrap();
    assert_eq!(ids(&h.manager.entities()), vec!["a"]);
    assert_eq!(h.manager.lookup(&temp), Lookup::NotFound);
}
