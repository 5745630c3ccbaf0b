//! View scopes: outcome events, teardown and lookups while unmounting

use crate::common::*;
use prayersync::offline::{Lookup, ViewEvent};
use prayersync::shared::{ChangeFilter, ChangeType, EntityId, Mutation};
use prayersync::SyncError;
use serde_json::json;

#[tokio::test]
async fn test_origin_view_hears_its_confirmation() {
    let h = harness(MockExecutor::succeeding(), true);
    h.manager.load_entities(prayers(&["a"]));
    let mut view = h.manager.mount_view();
    let other = h.manager.mount_view();

    let mutation_id = h
        .manager
        .submit_from(&view, Mutation::Delete { id: "a".into() })
        .await
        .unwrap();
    h.manager.sync_now().await.unwrap();

    assert_eq!(
        view.try_next_event(),
        Some(ViewEvent::Confirmed {
            mutation_id,
            entity_id: "a".into()
        })
    );
    drop(other);
}

#[tokio::test]
async fn test_unmounted_view_gets_no_events_but_queue_completes() {
    let h = harness(MockExecutor::with_fallback(Err(SyncError::unauthorized("no"))), false);
    h.manager.load_entities(prayers(&["a"]));
    let mut errors = h.manager.subscribe_errors();

    let view = h.manager.mount_view();
    h.manager
        .submit_from(&view, Mutation::Delete { id: "a".into() })
        .await
        .unwrap();
    view.unmount().await;

    h.manager.set_reachable(true);
    h.manager.sync_now().await.unwrap();

    // The rollback still happens and is still reported once
    assert_eq!(ids(&h.manager.entities()), vec!["a"]);
    assert!(errors.try_recv().is_ok());
    assert!(errors.try_recv().is_err());
    assert_eq!(h.manager.queue_stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_lookup_while_unmounting_is_detached() {
    let h = harness(MockExecutor::succeeding(), true);
    h.manager.load_entities(prayers(&["a"]));
    let view = h.manager.mount_view();

    assert_eq!(view.lookup(&"gone".into()), Lookup::NotFound);
    view.begin_unmount();
    assert_eq!(view.lookup(&"gone".into()), Lookup::Detached);
    assert!(!view.lookup(&"gone".into()).is_error());
    assert_eq!(view.lookup(&"a".into()), Lookup::Found(prayer("a", 1)));
}

#[tokio::test]
async fn test_unmount_cancels_subscriptions() {
    let h = harness(MockExecutor::succeeding(), true);
    let mut leaving = h.manager.mount_view();
    let mut staying = h.manager.mount_view();
    h.manager
        .subscribe(&mut leaving, ChangeFilter::field("prayers", "group_id", json!("g-1")))
        .await
        .unwrap();
    h.manager
        .subscribe(&mut staying, ChangeFilter::field("prayers", "group_id", json!("g-2")))
        .await
        .unwrap();

    leaving.unmount().await;
    h.push.publish(event("late", ChangeType::Insert, 1, json!({"group_id": "g-1"})));
    h.push.publish(event("marker", ChangeType::Insert, 1, json!({"group_id": "g-2"})));

    let manager = &h.manager;
    eventually(|| async move { manager.lookup(&"marker".into()) != Lookup::NotFound }).await;
    assert_eq!(h.manager.lookup(&EntityId::from("late")), Lookup::NotFound);
    drop(staying);
}
