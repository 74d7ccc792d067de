//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, loads, and evictions.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Lock-free performance counters shared by all callers of a backend.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a lookup answered from the cache.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a lookup that waited on another caller's load of the same block.
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a lookup that had to run the loader.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, success: bool) {
        if success {
            self.loads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Captures the counters together with the backend's current size.
    pub fn snapshot(&self, entries: usize, weight: u64, budget: u64) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries,
            weight,
            budget,
            captured_at: Utc::now(),
        }
    }
}

// == Stats Snapshot ==
/// Point-in-time view of a backend's counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Requests that joined a load already in flight
    pub coalesced: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Number of entries currently stored
    pub entries: usize,
    /// Total weight of stored entries in bytes
    pub weight: u64,
    /// Configured budget in bytes
    pub budget: u64,
    pub captured_at: DateTime<Utc>,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses + coalesced), or 0.0 if no requests
    /// have been made. A coalesced request found no cached block, so it does
    /// not count as a hit.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the budget in use.
    pub fn fill_ratio(&self) -> f64 {
        if self.budget == 0 {
            0.0
        } else {
            self.weight as f64 / self.budget as f64
        }
    }
}
