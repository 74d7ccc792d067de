//! Weighted Concurrent Cache Module
//!
//! High-throughput backend: entries live in a sharded map, every entry is
//! charged its byte weight, and the least recently used entries are evicted
//! whenever the total weight exceeds the budget.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::inflight::{load_through, BlockStore, InFlightTable};
use crate::cache::{
    BackendKind, BlockKey, BlockLocalKey, BlockValue, CacheBackend, CacheStats, CachedEntry,
    EvictionListener, PartialKey, RemovalCause, SourceId, StatsSnapshot,
};
use crate::error::Result;

type Slot<V> = Arc<CachedEntry<V>>;

/// Stale recency records tolerated before the index is rebuilt.
const RECENCY_SLACK: usize = 1024;

// == Weighted Concurrent Cache ==
/// Byte-budgeted LRU cache optimized for many concurrent readers and writers.
///
/// Lookups touch a single map shard plus an atomic clock. Eviction is
/// serialized behind its own lock and never blocks lookups of other keys.
pub struct WeightedConcurrentCache<K: BlockLocalKey, V: BlockValue> {
    entries: DashMap<BlockKey<K>, Slot<V>>,
    inflight: InFlightTable<K, V>,
    stats: CacheStats,
    /// Logical clock stamped on every access
    clock: AtomicU64,
    total_weight: AtomicU64,
    budget: u64,
    /// Keys ordered by the tick they were last queued at. Records may be
    /// stale; eviction skips or re-queues them.
    recency: Mutex<BTreeMap<u64, BlockKey<K>>>,
    eviction_lock: Mutex<()>,
    listener: Option<EvictionListener<K, V>>,
}

impl<K: BlockLocalKey, V: BlockValue> WeightedConcurrentCache<K, V> {
    // == Constructor ==
    /// Creates an empty cache holding at most `budget` bytes.
    pub fn new(budget: u64) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: InFlightTable::new(),
            stats: CacheStats::new(),
            clock: AtomicU64::new(0),
            total_weight: AtomicU64::new(0),
            budget,
            recency: Mutex::new(BTreeMap::new()),
            eviction_lock: Mutex::new(()),
            listener: None,
        }
    }

    /// Installs a hook run after every removal.
    pub fn with_eviction_listener(mut self, listener: EvictionListener<K, V>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn notify(&self, key: &BlockKey<K>, slot: &Slot<V>, cause: RemovalCause) {
        if let Some(listener) = &self.listener {
            listener(key, &slot.value, cause);
        }
    }

    /// Removes `key` only if it still maps to `slot`.
    fn remove_slot(&self, key: &BlockKey<K>, slot: &Slot<V>, cause: RemovalCause) -> bool {
        match self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot))
        {
            Some((key, removed)) => {
                self.total_weight.fetch_sub(removed.weight, Ordering::AcqRel);
                self.notify(&key, &removed, cause);
                true
            }
            None => false,
        }
    }

    fn remove_key(&self, key: &BlockKey<K>, cause: RemovalCause) -> bool {
        match self.entries.remove(key) {
            Some((key, removed)) => {
                self.total_weight.fetch_sub(removed.weight, Ordering::AcqRel);
                self.notify(&key, &removed, cause);
                true
            }
            None => false,
        }
    }

    /// Removes every entry whose key satisfies `predicate`.
    fn remove_where(&self, predicate: impl Fn(&BlockKey<K>) -> bool) -> u64 {
        let doomed: Vec<(BlockKey<K>, Slot<V>)> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0;
        for (key, slot) in doomed {
            if self.remove_slot(&key, &slot, RemovalCause::Explicit) {
                removed += 1;
            }
        }
        self.stats.record_invalidations(removed);
        self.compact_recency();
        removed
    }

    /// Stores `value` under `key` and queues it in the recency index.
    fn insert_slot(&self, key: &BlockKey<K>, value: V) {
        let tick = self.tick();
        let slot = Arc::new(CachedEntry::new(value, tick));
        self.total_weight.fetch_add(slot.weight, Ordering::AcqRel);
        if let Some(replaced) = self.entries.insert(key.clone(), slot) {
            self.total_weight
                .fetch_sub(replaced.weight, Ordering::AcqRel);
        }
        self.recency.lock().insert(tick, key.clone());
    }

    /// Rebuilds the recency index once records of removed entries pile up.
    fn compact_recency(&self) {
        let mut recency = self.recency.lock();
        if recency.len() <= self.entries.len() * 2 + RECENCY_SLACK {
            return;
        }
        *recency = self
            .entries
            .iter()
            .map(|entry| (entry.value().last_access(), entry.key().clone()))
            .collect();
        debug!(records = recency.len(), "recency index compacted");
    }

    // == Eviction ==
    /// Evicts least recently used entries until the total weight fits the budget.
    ///
    /// Candidates come off the front of the recency index. An entry touched
    /// after it was queued goes back in at its latest tick, so every touch
    /// costs at most one extra step here. Returns the number of index records
    /// examined.
    ///
    /// Callers that find another thread already evicting return immediately;
    /// the running pass keeps going until the budget holds.
    fn evict_if_needed(&self) -> usize {
        if self.total_weight.load(Ordering::Acquire) <= self.budget {
            return 0;
        }
        let Some(_guard) = self.eviction_lock.try_lock() else {
            return 0;
        };

        let mut examined = 0;
        let mut evicted = 0u64;
        while self.total_weight.load(Ordering::Acquire) > self.budget {
            let next = self.recency.lock().pop_first();
            let Some((tick, key)) = next else {
                break;
            };
            examined += 1;

            let slot = self.entries.get(&key).map(|entry| Arc::clone(entry.value()));
            let Some(slot) = slot else {
                continue;
            };
            let last_access = slot.last_access();
            if last_access != tick {
                self.recency.lock().insert(last_access, key);
                continue;
            }
            if self.remove_slot(&key, &slot, RemovalCause::Size) {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.record_evictions(evicted);
            debug!(
                evicted,
                examined,
                weight = self.total_weight.load(Ordering::Relaxed),
                budget = self.budget,
                "weighted cache eviction pass"
            );
        }
        examined
    }
}

impl<K: BlockLocalKey, V: BlockValue> BlockStore<K, V> for WeightedConcurrentCache<K, V> {
    fn lookup(&self, key: &BlockKey<K>) -> Option<V> {
        self.entries.get(key).map(|slot| {
            slot.touch(self.tick());
            slot.value.clone()
        })
    }

    fn admit(&self, key: &BlockKey<K>, value: V) {
        self.insert_slot(key, value);
        self.evict_if_needed();
    }

    fn retract(&self, key: &BlockKey<K>) {
        if self.remove_key(key, RemovalCause::Explicit) {
            self.stats.record_invalidations(1);
        }
    }
}

impl<K: BlockLocalKey, V: BlockValue> CacheBackend<K, V> for WeightedConcurrentCache<K, V> {
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
        if self.remove_key(key, RemovalCause::Explicit) {
            self.stats.record_invalidations(1);
            self.compact_recency();
        }
    }

    fn invalidate_matching(&self, source: SourceId, timepoint: u32, level: u32) {
        let prefix = PartialKey::new(source, timepoint, level);
        self.inflight.mark_stale_where(|k| prefix.matches(k));
        let removed = self.remove_where(|k| prefix.matches(k));
        debug!(%prefix, removed, "invalidated matching blocks");
    }

    fn invalidate_all(&self) {
        self.inflight.mark_stale_where(|_| true);
        let removed = self.remove_where(|_| true);
        debug!(removed, "invalidated all blocks");
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn current_weight(&self) -> u64 {
        self.total_weight.load(Ordering::Acquire)
    }

    fn budget(&self) -> u64 {
        self.budget
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.len(), self.current_weight(), self.budget)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::WeightedConcurrent
    }
}

impl<K: BlockLocalKey, V: BlockValue> fmt::Debug for WeightedConcurrentCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedConcurrentCache")
            .field("entries", &self.entries.len())
            .field("weight", &self.current_weight())
            .field("budget", &self.budget)
            .field("in_flight", &self.inflight.len())
            .finish()
    }
}
