//! LRU Tracker Module
//!
//! Access-order bookkeeping for the simple bounded backend.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

// == LRU Tracker ==
/// Tracks access order for LRU eviction.
///
/// Every touch stamps the key with a fresh tick. `order` is sorted by tick,
/// so its first entry is the least recently used key. Touch, remove and
/// evict are all logarithmic in the number of tracked keys.
#[derive(Debug)]
pub struct LruTracker<T> {
    clock: u64,
    ticks: HashMap<T, u64>,
    order: BTreeMap<u64, T>,
}

impl<T: Eq + Hash + Clone> LruTracker<T> {
    pub fn new() -> Self {
        Self {
            clock: 0,
            ticks: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    // == Touch ==
    /// Marks a key as most recently used, tracking it if new.
    pub fn touch(&mut self, key: &T) {
        self.clock += 1;
        if let Some(previous) = self.ticks.insert(key.clone(), self.clock) {
            self.order.remove(&previous);
        }
        self.order.insert(self.clock, key.clone());
    }

    /// Stops tracking `key`. Returns false if it was not tracked.
    pub fn remove(&mut self, key: &T) -> bool {
        match self.ticks.remove(key) {
            Some(tick) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }

    // == Evict Oldest ==
    /// Removes and returns the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<T> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for LruTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
