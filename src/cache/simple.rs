//! Simple Bounded Cache Module
//!
//! Fallback backend: one lock around a map and an access-order tracker.
//! Easy to reason about, not meant for heavy concurrency.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::inflight::{load_through, BlockStore, InFlightTable};
use crate::cache::{
    BackendKind, BlockKey, BlockLocalKey, BlockValue, CacheBackend, CacheStats, CachedEntry,
    EvictionListener, LruTracker, PartialKey, RemovalCause, SourceId, StatsSnapshot,
};
use crate::error::Result;

type Removed<K, V> = Vec<(BlockKey<K>, V)>;

// == Store State ==
#[derive(Debug)]
struct StoreState<K, V> {
    entries: HashMap<BlockKey<K>, CachedEntry<V>>,
    lru: LruTracker<BlockKey<K>>,
    weight: u64,
}

impl<K: BlockLocalKey, V: BlockValue> StoreState<K, V> {
    fn remove(&mut self, key: &BlockKey<K>) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.weight -= entry.weight;
        Some(entry.value)
    }

    fn remove_where(&mut self, predicate: impl Fn(&BlockKey<K>) -> bool) -> Removed<K, V> {
        let doomed: Vec<BlockKey<K>> = self
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|key| self.remove(&key).map(|value| (key, value)))
            .collect()
    }
}

// == Simple Bounded Cache ==
/// Access-ordered cache whose every operation is serialized by one lock.
///
/// Capacity is a byte budget, optionally tightened by a maximum entry count.
/// Both limits are checked on each insertion.
pub struct SimpleBoundedCache<K: BlockLocalKey, V: BlockValue> {
    state: Mutex<StoreState<K, V>>,
    inflight: InFlightTable<K, V>,
    stats: CacheStats,
    budget: u64,
    max_entries: Option<usize>,
    listener: Option<EvictionListener<K, V>>,
}

impl<K: BlockLocalKey, V: BlockValue> SimpleBoundedCache<K, V> {
    // == Constructor ==
    /// Creates an empty cache holding at most `budget` bytes.
    pub fn new(budget: u64) -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                weight: 0,
            }),
            inflight: InFlightTable::new(),
            stats: CacheStats::new(),
            budget,
            max_entries: None,
            listener: None,
        }
    }

    /// Additionally caps the number of entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Installs a hook run after every removal.
    pub fn with_eviction_listener(mut self, listener: EvictionListener<K, V>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn over_capacity(&self, state: &StoreState<K, V>) -> bool {
        state.weight > self.budget
            || self
                .max_entries
                .is_some_and(|max| state.entries.len() > max)
    }

    /// Runs the listener outside the lock.
    fn notify(&self, removed: Removed<K, V>, cause: RemovalCause) {
        if let Some(listener) = &self.listener {
            for (key, value) in &removed {
                listener(key, value, cause);
            }
        }
    }

    fn invalidate_where(&self, predicate: impl Fn(&BlockKey<K>) -> bool) -> usize {
        let removed = self.state.lock().remove_where(predicate);
        let count = removed.len();
        self.stats.record_invalidations(count as u64);
        self.notify(removed, RemovalCause::Explicit);
        count
    }
}

impl<K: BlockLocalKey, V: BlockValue> BlockStore<K, V> for SimpleBoundedCache<K, V> {
    fn lookup(&self, key: &BlockKey<K>) -> Option<V> {
        let mut state = self.state.lock();
        let value = state.entries.get(key)?.value.clone();
        state.lru.touch(key);
        Some(value)
    }

    fn admit(&self, key: &BlockKey<K>, value: V) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            state.remove(key);
            let entry = CachedEntry::new(value, 0);
            state.weight += entry.weight;
            state.entries.insert(key.clone(), entry);
            state.lru.touch(key);

            while self.over_capacity(&state) {
                let Some(oldest) = state.lru.evict_oldest() else {
                    break;
                };
                if let Some(value) = state.remove(&oldest) {
                    evicted.push((oldest, value));
                }
            }
        }

        if !evicted.is_empty() {
            self.stats.record_evictions(evicted.len() as u64);
            debug!(evicted = evicted.len(), "simple cache eviction");
            self.notify(evicted, RemovalCause::Size);
        }
    }

    fn retract(&self, key: &BlockKey<K>) {
        let removed = self.state.lock().remove(key);
        if let Some(value) = removed {
            self.stats.record_invalidations(1);
            self.notify(vec![(key.clone(), value)], RemovalCause::Explicit);
        }
    }
}

impl<K: BlockLocalKey, V: BlockValue> CacheBackend<K, V> for SimpleBoundedCache<K, V> {
    fn get_or_load(
        &self,
        key: &BlockKey<K>,
        loader: &mut dyn FnMut() -> anyhow::Result<V>,
    ) -> Result<V> {
        load_through(self, &self.inflight, &self.stats, key, loader)
    }

    fn get_if_present(&self, key: &BlockKey<K>) -> Option<V> {
        self.lookup(key)
    }

    fn invalidate(&self, key: &BlockKey<K>) {
        self.inflight.mark_stale_where(|k| k == key);
        self.invalidate_where(|k| k == key);
    }

    fn invalidate_matching(&self, source: SourceId, timepoint: u32, level: u32) {
        let prefix = PartialKey::new(source, timepoint, level);
        self.inflight.mark_stale_where(|k| prefix.matches(k));
        let removed = self.invalidate_where(|k| prefix.matches(k));
        debug!(%prefix, removed, "invalidated matching blocks");
    }

    fn invalidate_all(&self) {
        self.inflight.mark_stale_where(|_| true);
        let removed = self.invalidate_where(|_| true);
        debug!(removed, "invalidated all blocks");
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn current_weight(&self) -> u64 {
        self.state.lock().weight
    }

    fn budget(&self) -> u64 {
        self.budget
    }

    fn stats(&self) -> StatsSnapshot {
        let (entries, weight) = {
            let state = self.state.lock();
            (state.entries.len(), state.weight)
        };
        self.stats.snapshot(entries, weight, self.budget)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SimpleBounded
    }
}

impl<K: BlockLocalKey, V: BlockValue> fmt::Debug for SimpleBoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleBoundedCache")
            .field("budget", &self.budget)
            .field("max_entries", &self.max_entries)
            .field("in_flight", &self.inflight.len())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GridCell;

    fn key(source: SourceId, z: i64) -> BlockKey<GridCell> {
        BlockKey::new(source, 0, 0, GridCell::new(0, 0, z))
    }

    fn load(
        cache: &SimpleBoundedCache<GridCell, Vec<u8>>,
        key: &BlockKey<GridCell>,
        bytes: usize,
    ) -> Vec<u8> {
        cache
            .get_or_load(key, &mut || Ok(vec![0u8; bytes]))
            .unwrap()
    }

    #[test]
    fn test_store_new() {
        let cache: SimpleBoundedCache<GridCell, Vec<u8>> = SimpleBoundedCache::new(100);
        assert!(cache.is_empty());
        assert_eq!(cache.kind(), BackendKind::SimpleBounded);
    }

    #[test]
    fn test_store_lru_eviction_by_weight() {
        let cache = SimpleBoundedCache::new(30);
        let source = SourceId::new();

        load(&cache, &key(source, 1), 10);
        load(&cache, &key(source, 2), 10);
        load(&cache, &key(source, 3), 10);

        // Cache is full, adding key 4 should evict key 1 (oldest)
        load(&cache, &key(source, 4), 10);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.current_weight(), 30);
        assert!(cache.get_if_present(&key(source, 1)).is_none());
        assert!(cache.get_if_present(&key(source, 4)).is_some());
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let cache = SimpleBoundedCache::new(30);
        let source = SourceId::new();

        load(&cache, &key(source, 1), 10);
        load(&cache, &key(source, 2), 10);
        load(&cache, &key(source, 3), 10);

        // Access key 1 to make it most recently used
        load(&cache, &key(source, 1), 10);

        // Adding key 4 should evict key 2 (now oldest)
        load(&cache, &key(source, 4), 10);

        assert!(cache.get_if_present(&key(source, 1)).is_some());
        assert!(cache.get_if_present(&key(source, 2)).is_none());
    }

    #[test]
    fn test_store_max_entries() {
        let cache = SimpleBoundedCache::new(1_000).with_max_entries(2);
        let source = SourceId::new();

        for z in 0..4 {
            load(&cache, &key(source, z), 1);
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_store_invalidate_nonexistent_is_noop() {
        let cache: SimpleBoundedCache<GridCell, Vec<u8>> = SimpleBoundedCache::new(100);
        cache.invalidate(&key(SourceId::new(), 0));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[test]
    fn test_store_invalidate_matching_keeps_other_levels() {
        let cache = SimpleBoundedCache::new(1_000);
        let source = SourceId::new();
        load(&cache, &key(source, 0), 10);
        load(&cache, &key(source, 1), 10);
        let other_level = BlockKey::new(source, 0, 1, GridCell::new(0, 0, 0));
        load(&cache, &other_level, 10);

        cache.invalidate_matching(source, 0, 0);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_weight(), 10);
        assert!(cache.get_if_present(&other_level).is_some());
    }

    #[test]
    fn test_store_stats() {
        let cache = SimpleBoundedCache::new(100);
        let source = SourceId::new();

        load(&cache, &key(source, 0), 5); // miss
        load(&cache, &key(source, 0), 5); // hit

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.weight, 5);
    }
}
