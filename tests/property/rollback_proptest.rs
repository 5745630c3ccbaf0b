//! Property-based tests for optimistic rollback

use crate::common::{fields, ids};
use proptest::prelude::*;
use prayersync::offline::OptimisticController;
use prayersync::shared::{CacheEntity, Mutation};
use prayersync::SyncError;
use serde_json::json;

fn feed(len: usize) -> Vec<CacheEntity> {
    (0..len)
        .map(|i| CacheEntity::new(format!("p-{}", i), 1, fields(json!({ "title": format!("Prayer {}", i) }))))
        .collect()
}

proptest! {
    #[test]
    fn test_failed_delete_restores_exact_order((len, k) in (1usize..30).prop_flat_map(|len| (Just(len), 0..len))) {
        let controller = OptimisticController::new(16);
        let original = feed(len);
        controller.load_entities(original.clone());

        let target = original[k].id.clone();
        let mutation_id = controller.apply_optimistic(Mutation::Delete { id: target.clone() }).unwrap();
        prop_assert!(!ids(&controller.entities()).contains(&target.as_str().to_string()));

        controller.rollback(mutation_id, SyncError::network("timeout")).unwrap();
        prop_assert_eq!(controller.entities(), original);
    }

    #[test]
    fn test_failed_update_restores_fields(
        (len, k) in (1usize..20).prop_flat_map(|len| (Just(len), 0..len)),
        title in "[a-z ]{1,24}",
    ) {
        let controller = OptimisticController::new(16);
        let original = feed(len);
        controller.load_entities(original.clone());

        let mutation_id = controller
            .apply_optimistic(Mutation::Update {
                id: original[k].id.clone(),
                fields: fields(json!({ "title": title })),
            })
            .unwrap();
        controller.rollback(mutation_id, SyncError::unauthorized("no")).unwrap();

        prop_assert_eq!(controller.entities(), original);
    }

    #[test]
    fn test_settled_mutations_leave_nothing_pending(deletes in proptest::collection::vec(any::<bool>(), 1..20)) {
        let controller = OptimisticController::new(32);
        let original = feed(deletes.len());
        controller.load_entities(original.clone());

        for (entity, confirm) in original.iter().zip(&deletes) {
            let mutation_id = controller.apply_optimistic(Mutation::Delete { id: entity.id.clone() }).unwrap();
            if *confirm {
                controller.confirm(mutation_id, None).unwrap();
            } else {
                controller.rollback(mutation_id, SyncError::network("down")).unwrap();
            }
        }

        prop_assert_eq!(controller.pending_count(), 0);
        prop_assert!(controller.in_flight_ids().is_empty());
        let kept = deletes.iter().filter(|confirmed| !**confirmed).count();
        prop_assert_eq!(controller.entities().len(), kept);
    }
}
