// tests/property/cache_invariants_test.rs

//! Property-based tests for the response cache and the guard's cache path
//! The newest write wins and fresh reads never report stale data.

use crate::test_helpers::TestContext;
use gatebridge::core::cache::ResponseCache;
use gatebridge::core::guard::{PayloadSource, RequestGuard};
use gatebridge::core::upstream::SimulatedGateway;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_last_write_wins(
        writes in prop::collection::vec(("[a-c]", "[a-e]", any::<i64>()), 1..40)
    ) {
        let cache: ResponseCache<i64> = ResponseCache::new(HashMap::new(), Duration::from_secs(60));
        let mut model: HashMap<(String, String), i64> = HashMap::new();

        for (category, key, value) in &writes {
            cache.write(category, key, *value);
            model.insert((category.clone(), key.clone()), *value);
        }

        for ((category, key), value) in &model {
            let hit = cache.read(category, key).unwrap();
            prop_assert_eq!(hit.payload, *value);
            prop_assert!(!hit.stale);
            prop_assert!(hit.age <= Duration::from_secs(60));
        }

        let total: usize = cache.entry_counts().values().sum();
        prop_assert_eq!(total, model.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 8,
        max_shrink_iters: 20,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_fetch_cached_returns_first_upstream_value(
        symbols in prop::collection::vec("[A-Z]{1,5}", 1..6)
    ) {
        let ctx = TestContext::connected();

        for (i, symbol) in symbols.iter().enumerate() {
            let guard = RequestGuard::enter(&ctx.state, "quote", "market", Duration::from_secs(1));
            let first_seen = ctx.state.cache.read_any("contract_details", symbol).is_none();
            let fetched = guard
                .fetch_cached(
                    "contract_details",
                    symbol,
                    move |gw: &mut SimulatedGateway| Ok(gw.echo(json!({ "n": i }), Duration::ZERO)),
                    Duration::from_secs(1),
                )
                .unwrap();

            if first_seen {
                prop_assert_eq!(fetched.source, PayloadSource::Upstream);
                prop_assert_eq!(fetched.payload, json!({ "n": i }));
            } else {
                prop_assert_eq!(fetched.source, PayloadSource::Cache);
            }
        }
    }
}
