//! Property-based tests for realtime reconciliation

use crate::common::{event, fields};
use proptest::prelude::*;
use prayersync::local_db::MemoryStore;
use prayersync::offline::{BroadcastPushChannel, IgnoreReason, MergeOutcome, OptimisticController, RealtimeReconciler};
use prayersync::shared::{CacheEntity, ChangeType};
use serde_json::json;
use std::sync::Arc;

fn reconciler(controller: &Arc<OptimisticController>) -> RealtimeReconciler {
    RealtimeReconciler::new(
        controller.clone(),
        Arc::new(BroadcastPushChannel::new(1)),
        Arc::new(MemoryStore::new()),
    )
}

fn change_type() -> impl Strategy<Value = ChangeType> {
    prop_oneof![
        Just(ChangeType::Insert),
        Just(ChangeType::Update),
        Just(ChangeType::Delete),
    ]
}

proptest! {
    #[test]
    fn test_stale_notifications_change_nothing(
        cached in 1i64..1_000,
        behind in 0i64..1_000,
        change_type in change_type(),
    ) {
        let controller = Arc::new(OptimisticController::new(16));
        let entity = CacheEntity::new("a", cached, fields(json!({"title": "Current"})));
        controller.load_entities(vec![entity.clone()]);

        let stale = event("a", change_type, cached - behind.min(cached), json!({"title": "Old"}));
        let outcome = reconciler(&controller).apply_event(&stale);

        prop_assert_eq!(outcome, MergeOutcome::Ignored(IgnoreReason::Stale));
        prop_assert_eq!(controller.entities(), vec![entity]);
    }

    #[test]
    fn test_newer_update_wins(cached in 1i64..1_000, ahead in 1i64..1_000) {
        let controller = Arc::new(OptimisticController::new(16));
        controller.load_entities(vec![CacheEntity::new("a", cached, fields(json!({"title": "Current"})))]);

        let newer = event("a", ChangeType::Update, cached + ahead, json!({"title": "Newer"}));
        prop_assert_eq!(reconciler(&controller).apply_event(&newer), MergeOutcome::Updated);

        let entity = controller.entities().remove(0);
        prop_assert_eq!(entity.version, cached + ahead);
        prop_assert_eq!(entity.field("title"), Some(&json!("Newer")));
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent(version in 1i64..1_000, repeats in 1usize..5) {
        let controller = Arc::new(OptimisticController::new(16));
        let reconciler = reconciler(&controller);
        let insert = event("a", ChangeType::Insert, version, json!({"title": "Hello"}));

        prop_assert_eq!(reconciler.apply_event(&insert), MergeOutcome::Inserted);
        for _ in 0..repeats {
            prop_assert_eq!(reconciler.apply_event(&insert), MergeOutcome::Ignored(IgnoreReason::Stale));
        }
        prop_assert_eq!(controller.entities().len(), 1);
    }
}
