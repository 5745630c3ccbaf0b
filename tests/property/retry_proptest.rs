//! Property-based tests for backoff timing

use proptest::prelude::*;
use prayersync::offline::RetryPolicy;
use prayersync::shared::SyncConfig;
use std::time::Duration;

proptest! {
    #[test]
    fn test_queue_backoff_is_monotonic_and_capped(
        base_ms in 1u64..2_000,
        cap_secs in 2u64..120,
        attempt in 1u32..40,
    ) {
        let config = SyncConfig::builder()
            .backoff(
                Duration::from_millis(base_ms),
                Duration::from_secs(cap_secs),
                Duration::from_secs(cap_secs),
            )
            .build()
            .unwrap();
        let policy = RetryPolicy::queue(&config);

        let current = policy.delay_for(attempt);
        let next = policy.delay_for(attempt + 1);
        prop_assert!(current <= next);
        prop_assert!(next <= Duration::from_secs(cap_secs));
    }

    #[test]
    fn test_direct_backoff_never_exceeds_cap(attempt in 1u32..40) {
        let policy = RetryPolicy::direct(&SyncConfig::default());
        prop_assert!(policy.delay_for(attempt) <= SyncConfig::default().direct_max_delay);
    }
}
