//! Cache Builder Module
//!
//! Turns a configuration plus ambient memory information into a running backend.

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    BackendKind, BlockLocalKey, BlockValue, CacheBackend, CacheConfiguration, EvictionListener,
    MemoryInfo, SimpleBoundedCache, WeightedConcurrentCache,
};
use crate::error::Result;

// == Cache Builder ==
/// Resolves a [`CacheConfiguration`] into a concrete [`CacheBackend`].
pub struct CacheBuilder<K: BlockLocalKey, V: BlockValue> {
    configuration: CacheConfiguration,
    memory: MemoryInfo,
    listener: Option<EvictionListener<K, V>>,
    max_entries: Option<usize>,
}

impl<K: BlockLocalKey, V: BlockValue> CacheBuilder<K, V> {
    pub fn new(configuration: CacheConfiguration, memory: MemoryInfo) -> Self {
        Self {
            configuration,
            memory,
            listener: None,
            max_entries: None,
        }
    }

    /// Hook run after every removal, whichever backend is selected.
    pub fn with_eviction_listener(mut self, listener: EvictionListener<K, V>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Entry-count cap; only the simple bounded backend honors it.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    // == Build ==
    /// Builds the selected backend.
    ///
    /// Fails with [`crate::error::CacheError::InvalidConfiguration`] when the
    /// sizing rule does not resolve to a positive budget.
    pub fn build(self) -> Result<Arc<dyn CacheBackend<K, V>>> {
        let budget = self.configuration.resolve_budget(&self.memory)?;
        let kind = self.configuration.backend();

        let backend: Arc<dyn CacheBackend<K, V>> = match kind {
            BackendKind::WeightedConcurrent => {
                let mut cache = WeightedConcurrentCache::new(budget);
                if let Some(listener) = self.listener {
                    cache = cache.with_eviction_listener(listener);
                }
                Arc::new(cache)
            }
            BackendKind::SimpleBounded => {
                let mut cache = SimpleBoundedCache::new(budget);
                if let Some(max_entries) = self.max_entries {
                    cache = cache.with_max_entries(max_entries);
                }
                if let Some(listener) = self.listener {
                    cache = cache.with_eviction_listener(listener);
                }
                Arc::new(cache)
            }
        };

        info!(
            backend = %kind,
            budget_mb = budget / (1024 * 1024),
            sizing = ?self.configuration.sizing(),
            "block cache built"
        );
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BlockKey, GridCell, SizingRule, SourceId, MIB};
    use crate::error::CacheError;

    #[test]
    fn test_build_selects_backend() {
        let memory = MemoryInfo::from_total(1024 * MIB);
        for kind in [BackendKind::WeightedConcurrent, BackendKind::SimpleBounded] {
            let config = CacheConfiguration::new(kind, SizingRule::FixedCacheBudget { mib: 16 });
            let cache = CacheBuilder::<GridCell, Vec<u8>>::new(config, memory)
                .build()
                .unwrap();
            assert_eq!(cache.kind(), kind);
            assert_eq!(cache.budget(), 16 * MIB);
        }
    }

    #[test]
    fn test_build_rejects_empty_budget() {
        let config = CacheConfiguration::new(
            BackendKind::WeightedConcurrent,
            SizingRule::FixedReservedForRest { mib: 2048 },
        );
        let result =
            CacheBuilder::<GridCell, Vec<u8>>::new(config, MemoryInfo::from_total(1024 * MIB)).build();
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_max_entries_applies_to_simple_backend() {
        let config = CacheConfiguration::new(
            BackendKind::SimpleBounded,
            SizingRule::FixedCacheBudget { mib: 1 },
        );
        let cache = CacheBuilder::<GridCell, Vec<u8>>::new(config, MemoryInfo::from_total(MIB))
            .with_max_entries(1)
            .build()
            .unwrap();
        let source = SourceId::new();
        for z in 0..3 {
            let key = BlockKey::new(source, 0, 0, GridCell::new(0, 0, z));
            cache.get_or_load(&key, &mut || Ok(vec![0u8; 8])).unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
