// tests/property/lock_invariants_test.rs

//! Property-based tests for lock groups
//! In-flight counts track a simple model and never leave `[0, capacity]`.

use gatebridge::core::locks::{AcquirePolicy, LockRegistry};
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

const GROUPS: [&str; 3] = ["market", "historical", "orders"];

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..GROUPS.len()).prop_map(Op::Acquire),
        (0..GROUPS.len()).prop_map(Op::Release),
    ]
}

fn registry(capacities: &[usize]) -> LockRegistry {
    LockRegistry::new(
        GROUPS
            .iter()
            .zip(capacities)
            .map(|(name, cap)| (name.to_string(), *cap)),
        2,
        AcquirePolicy {
            timeout: Duration::from_millis(10),
            max_attempts: 1,
            backoff: Duration::ZERO,
        },
        Duration::from_secs(8),
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_inflight_matches_model(
        capacities in prop::collection::vec(0usize..4, GROUPS.len()),
        ops in prop::collection::vec(op_strategy(), 1..60)
    ) {
        let locks = registry(&capacities);
        let mut model: HashMap<&str, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Acquire(i) => {
                    let name = GROUPS[i];
                    let capacity = locks.group(name).capacity();
                    let held = model.entry(name).or_default();
                    let acquisition = locks.acquire(name, Duration::from_millis(10), 1, Duration::ZERO);
                    prop_assert_eq!(acquisition.acquired, *held < capacity);
                    if acquisition.acquired {
                        *held += 1;
                    }
                }
                Op::Release(i) => {
                    let name = GROUPS[i];
                    let held = model.entry(name).or_default();
                    let released = locks.release(name, Duration::from_millis(1));
                    prop_assert_eq!(released, *held > 0);
                    *held = held.saturating_sub(1);
                }
            }

            for name in GROUPS {
                let group = locks.group(name);
                prop_assert!(group.capacity() >= 1);
                prop_assert!(group.inflight() <= group.capacity());
                prop_assert_eq!(group.inflight(), model.get(name).copied().unwrap_or(0));
            }
        }
    }

    #[test]
    fn test_unknown_groups_share_default(
        names in prop::collection::vec("[a-z]{1,12}", 1..10)
    ) {
        let locks = registry(&[1, 1, 1]);
        for name in &names {
            let group = locks.group(name);
            if GROUPS.contains(&name.as_str()) {
                prop_assert_eq!(group.name(), name.as_str());
            } else {
                prop_assert_eq!(group.name(), "default");
                prop_assert_eq!(group.capacity(), 2);
            }
        }
    }
}
