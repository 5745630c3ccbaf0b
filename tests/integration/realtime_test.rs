//! Realtime notifications merged through view subscriptions

use crate::common::*;
use prayersync::offline::Lookup;
use prayersync::shared::{CacheEntity, ChangeFilter, ChangeType, EntityId, Mutation};
use prayersync::SyncError;
use serde_json::json;

/// Publish a marker insert and wait for it, so every earlier event has been
/// merged by the time this returns
async fn flush(h: &Harness, marker: &str) {
    h.push
        .publish(event(marker, ChangeType::Insert, 1, json!({"title": marker})));
    let manager = &h.manager;
    let marker = EntityId::from(marker);
    eventually(|| {
        let marker = marker.clone();
        async move { manager.lookup(&marker) != Lookup::NotFound }
    })
    .await;
}

#[tokio::test]
async fn test_remote_insert_and_update_reach_the_cache() {
    let h = harness(MockExecutor::succeeding(), true);
    h.manager.load_entities(prayers(&["a"]));
    let mut view = h.manager.mount_view();
    h.manager.subscribe(&mut view, ChangeFilter::all("prayers")).await.unwrap();

    h.push.publish(event("a", ChangeType::Update, 2, json!({"title": "Answered!"})));
    flush(&h, "b").await;

    assert_eq!(ids(&h.manager.entities()), vec!["b", "a"]);
    let a = h.manager.lookup(&"a".into());
    assert_eq!(a.entity().unwrap().field("title"), Some(&json!("Answered!")));
    assert_eq!(a.entity().unwrap().version, 2);
}

#[tokio::test]
async fn test_stale_notification_changes_nothing() {
    let h = harness(MockExecutor::succeeding(), true);
    h.manager.load_entities(vec![prayer("a", 5)]);
    let mut view = h.manager.mount_view();
    h.manager.subscribe(&mut view, ChangeFilter::all("prayers")).await.unwrap();

    h.push.publish(event("a", ChangeType::Update, 4, json!({"title": "Old"})));
    h.push.publish(event("a", ChangeType::Update, 5, json!({"title": "Duplicate"})));
    flush(&h, "z").await;

    assert_eq!(h.manager.lookup(&"a".into()), Lookup::Found(prayer("a", 5)));
}

#[tokio::test]
async fn test_own_create_echo_does_not_duplicate() {
    let server_copy = CacheEntity::new("p-1", 1, fields(json!({"title": "Exams"})));
    let h = harness(MockExecutor::with_fallback(Ok(Some(server_copy.clone()))), false);
    let mut view = h.manager.mount_view();
    h.manager.subscribe(&mut view, ChangeFilter::all("prayers")).await.unwrap();

    let temp = EntityId::temporary();
    h.manager
        .submit(Mutation::Create {
            entity: CacheEntity::new(temp.clone(), 0, fields(json!({"title": "Exams"}))),
        })
        .await
        .unwrap();

    // The push channel can beat the executor's confirmation
    h.push.publish(event(
        "p-1",
        ChangeType::Insert,
        1,
        json!({"title": "Exams", "client_ref": temp.as_str()}),
    ));
    flush(&h, "z").await;
    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();

    assert_eq!(ids(&h.manager.entities()), vec!["z", "p-1"]);
    assert_eq!(h.manager.lookup(&temp), Lookup::Found(server_copy));
}

#[tokio::test]
async fn test_update_during_pending_delete_does_not_resurrect() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::unauthorized("no"))), false);
    h.manager.load_entities(prayers(&["a", "b"]));
    let mut view = h.manager.mount_view();
    h.manager.subscribe(&mut view, ChangeFilter::all("prayers")).await.unwrap();

    h.manager.submit(Mutation::Delete { id: "a".into() }).await.unwrap();
    h.push.publish(event("a", ChangeType::Update, 2, json!({"title": "Edited elsewhere"})));
    flush(&h, "z").await;
    assert_eq!(h.manager.lookup(&"a".into()), Lookup::Pending);

    // The delete fails, and the restored copy is the newest one seen
    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();
    let a = h.manager.lookup(&"a".into());
    assert_eq!(a.entity().unwrap().version, 2);
    assert_eq!(ids(&h.manager.entities()), vec!["z", "a", "b"]);
}

#[tokio::test]
async fn test_remote_delete_during_pending_delete_stays_deleted() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::unauthorized("no"))), false);
    h.manager.load_entities(prayers(&["a", "b"]));
    let mut view = h.manager.mount_view();
    h.manager.subscribe(&mut view, ChangeFilter::all("prayers")).await.unwrap();
    let mut errors = h.manager.subscribe_errors();

    h.manager.submit(Mutation::Delete { id: "a".into() }).await.unwrap();
    h.push.publish(event("a", ChangeType::Delete, 2, json!({})));
    flush(&h, "z").await;

    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();

    assert_eq!(h.manager.lookup(&"a".into()), Lookup::Deleted);
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_filtered_subscription_ignores_other_groups() {
    let h = harness(MockExecutor::succeeding(), true);
    let mut view = h.manager.mount_view();
    h.manager
        .subscribe(&mut view, ChangeFilter::field("prayers", "group_id", json!("g-1")))
        .await
        .unwrap();

    h.push.publish(event("other", ChangeType::Insert, 1, json!({"group_id": "g-2"})));
    h.push.publish(event("mine", ChangeType::Insert, 1, json!({"group_id": "g-1"})));
    let manager = &h.manager;
    eventually(|| async move { manager.lookup(&"mine".into()) != Lookup::NotFound }).await;

    assert_eq!(ids(&h.manager.entities()), vec!["mine"]);
}

#[tokio::test]
async fn test_cursor_advances_with_merged_events() {
    let h = harness(MockExecutor::succeeding(), true);
    let filter = ChangeFilter::all("prayers");
    let mut view = h.manager.mount_view();
    h.manager.subscribe(&mut view, filter.clone()).await.unwrap();
    assert_eq!(h.manager.reconciler().cursor(&filter).await.unwrap(), None);

    let latest = event("a", ChangeType::Insert, 1, json!({}));
    let committed_at = latest.committed_at;
    h.push.publish(latest);

    let reconciler = h.manager.reconciler();
    let filter = &filter;
    eventually(|| async move {
        reconciler
            .cursor(filter)
            .await
            .unwrap()
            .is_some_and(|cursor| cursor.committed_at == committed_at)
    })
    .await;
}

#[tokio::test]
async fn test_late_event_behind_stored_cursor_is_still_merged() {
    let h = harness(MockExecutor::succeeding(), true);
    h.manager.load_entities(vec![prayer("a", 1)]);
    let filter = ChangeFilter::all("prayers");

    let mut first = h.manager.mount_view();
    h.manager.subscribe(&mut first, filter.clone()).await.unwrap();
    let newer = event("b", ChangeType::Insert, 1, json!({"title": "b"}));
    let cursor_at = newer.committed_at;
    h.push.publish(newer);
    let reconciler = h.manager.reconciler();
    let filter_ref = &filter;
    eventually(|| async move {
        reconciler
            .cursor(filter_ref)
            .await
            .unwrap()
            .is_some_and(|cursor| cursor.committed_at == cursor_at)
    })
    .await;
    first.unmount().await;

    // A new view resumes from the stored cursor
    let mut second = h.manager.mount_view();
    h.manager.subscribe(&mut second, filter.clone()).await.unwrap();

    // Committed before b but delivered after it
    let mut late = event("a", ChangeType::Update, 2, json!({"title": "Late"}));
    late.committed_at = cursor_at - chrono::Duration::seconds(1);
    h.push.publish(late);
    flush(&h, "z").await;

    let a = h.manager.lookup(&"a".into());
    assert_eq!(a.entity().unwrap().version, 2);
    assert_eq!(a.entity().unwrap().field("title"), Some(&json!("Late")));
}
