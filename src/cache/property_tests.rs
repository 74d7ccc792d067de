//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key identity, configuration round-trips, and
//! budget enforcement over arbitrary inputs.

use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::cache::{
    BackendKind, BlockKey, CacheBackend, CacheConfiguration, GridCell, MemoryInfo,
    SimpleBoundedCache, SizingRule, SourceId, WeightedConcurrentCache, MIB,
};

// == Strategies ==
fn grid_cell_strategy() -> impl Strategy<Value = GridCell> {
    (-8i64..8, -8i64..8, -8i64..8).prop_map(|(x, y, z)| GridCell::new(x, y, z))
}

fn sizing_strategy() -> impl Strategy<Value = SizingRule> {
    prop_oneof![
        (1u32..=100).prop_map(|percent| SizingRule::RatioOfAvailableMemory { percent }),
        (1u64..64 * 1024).prop_map(|mib| SizingRule::FixedCacheBudget { mib }),
        (1u64..1024).prop_map(|mib| SizingRule::FixedReservedForRest { mib }),
    ]
}

fn backend_strategy() -> impl Strategy<Value = BackendKind> {
    prop_oneof![
        Just(BackendKind::WeightedConcurrent),
        Just(BackendKind::SimpleBounded)
    ]
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Keys that share a prefix but differ in block-local key are distinct
    // under full equality yet match the same partial predicate.
    #[test]
    fn prop_partial_match_ignores_block_local_key(
        timepoint in 0u32..100,
        level in 0u32..8,
        a in grid_cell_strategy(),
        b in grid_cell_strategy(),
    ) {
        let source = SourceId::new();
        let ka = BlockKey::new(source, timepoint, level, a);
        let kb = BlockKey::new(source, timepoint, level, b);

        prop_assert_eq!(ka == kb, a == b);
        prop_assert!(ka.partial_eq(source, timepoint, level));
        prop_assert!(kb.partial_eq(source, timepoint, level));
    }

    // Eq is reflexive, symmetric and transitive; equal keys hash equally.
    #[test]
    fn prop_eq_hash_contract(
        t in 0u32..3,
        l in 0u32..3,
        cells in prop::collection::vec(grid_cell_strategy(), 3),
    ) {
        let source = SourceId::new();
        let keys: Vec<_> = cells
            .iter()
            .map(|cell| BlockKey::new(source, t, l, *cell))
            .collect();

        for a in &keys {
            prop_assert_eq!(a, a);
            for b in &keys {
                prop_assert_eq!(a == b, b == a);
                if a == b {
                    prop_assert_eq!(hash_of(a), hash_of(b));
                }
                for c in &keys {
                    if a == b && b == c {
                        prop_assert_eq!(a, c);
                    }
                }
            }
        }
    }

    // Serialize then deserialize preserves the resolved budget.
    #[test]
    fn prop_configuration_round_trip_preserves_budget(
        backend in backend_strategy(),
        sizing in sizing_strategy(),
        log_ms in -1i64..60_000,
        total_mib in 2048u64..65_536,
    ) {
        let config = CacheConfiguration::new(backend, sizing).with_stats_log_interval_ms(log_ms);
        let memory = MemoryInfo::from_total(total_mib * MIB);

        let decoded = CacheConfiguration::try_from_json(&config.to_json().unwrap()).unwrap();

        prop_assert_eq!(&decoded, &config);
        prop_assert_eq!(
            decoded.resolve_budget(&memory).ok(),
            config.resolve_budget(&memory).ok()
        );
    }

    // Whatever the access pattern, neither backend settles above its budget.
    #[test]
    fn prop_backends_respect_budget(
        sizes in prop::collection::vec(1usize..64, 1..80),
        budget in 64u64..512,
    ) {
        let source = SourceId::new();
        let weighted: WeightedConcurrentCache<GridCell, Vec<u8>> = WeightedConcurrentCache::new(budget);
        let simple: SimpleBoundedCache<GridCell, Vec<u8>> = SimpleBoundedCache::new(budget);

        for (i, size) in sizes.iter().enumerate() {
            let key = BlockKey::new(source, 0, 0, GridCell::new(i as i64 % 16, 0, 0));
            let size = *size;
            weighted.get_or_load(&key, &mut || Ok(vec![0u8; size])).unwrap();
            simple.get_or_load(&key, &mut || Ok(vec![0u8; size])).unwrap();

            prop_assert!(weighted.current_weight() <= budget);
            prop_assert!(simple.current_weight() <= budget);
        }
    }
}
