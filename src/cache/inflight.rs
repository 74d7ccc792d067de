//! In-Flight Load Module
//!
//! Deduplicates concurrent loads of the same block. The first caller for a
//! missing key becomes the leader and runs the loader; every other caller
//! for that key blocks until the leader publishes its result.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::cache::{BlockKey, CacheStats};
use crate::error::{CacheError, Result};

// == Pending Load ==
/// Result slot for one in-flight load.
#[derive(Debug)]
pub struct PendingLoad<V> {
    result: Mutex<Option<Result<V>>>,
    ready: Condvar,
    stale: AtomicBool,
}

impl<V: Clone> PendingLoad<V> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
            stale: AtomicBool::new(false),
        }
    }

    /// Blocks until the leader publishes, then returns a clone of the outcome.
    pub fn wait(&self) -> Result<V> {
        let mut guard = self.result.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut guard);
        }
    }

    fn complete(&self, outcome: Result<V>) {
        let mut guard = self.result.lock();
        if guard.is_none() {
            *guard = Some(outcome);
        }
        self.ready.notify_all();
    }

    /// Marks the load as overtaken by an invalidation.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }
}

// == In-Flight Table ==
/// Loads currently running, keyed by block.
#[derive(Debug)]
pub struct InFlightTable<K, V>
where
    K: Eq + Hash,
{
    loads: DashMap<BlockKey<K>, Arc<PendingLoad<V>>>,
}

/// Outcome of trying to claim a key.
pub enum Claim<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// This caller must run the loader
    Leader(LoadGuard<'a, K, V>),
    /// Another caller is already loading; wait on this slot
    Follower(Arc<PendingLoad<V>>),
}

impl<K, V> InFlightTable<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            loads: DashMap::new(),
        }
    }

    /// Registers the caller as leader for `key`, or hands back the running load.
    pub fn claim(&self, key: &BlockKey<K>) -> Claim<'_, K, V> {
        match self.loads.entry(key.clone()) {
            Entry::Occupied(occupied) => Claim::Follower(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let pending = Arc::new(PendingLoad::new());
                vacant.insert(Arc::clone(&pending));
                Claim::Leader(LoadGuard {
                    table: self,
                    key: key.clone(),
                    pending,
                    finished: false,
                })
            }
        }
    }

    /// Flags every running load whose key satisfies `predicate` as stale.
    ///
    /// Returns the number of loads flagged.
    pub fn mark_stale_where(&self, predicate: impl Fn(&BlockKey<K>) -> bool) -> usize {
        let mut flagged = 0;
        for load in self.loads.iter() {
            if predicate(load.key()) {
                load.value().mark_stale();
                flagged += 1;
            }
        }
        flagged
    }

    /// Number of loads currently running.
    pub fn len(&self) -> usize {
        self.loads.len()
    }

    fn release(&self, key: &BlockKey<K>, pending: &Arc<PendingLoad<V>>) {
        self.loads
            .remove_if(key, |_, current| Arc::ptr_eq(current, pending));
    }
}

impl<K, V> Default for InFlightTable<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Load Guard ==
/// Leadership over one in-flight load.
///
/// Dropping the guard without calling [`LoadGuard::finish`] (a panicking
/// loader) completes the slot with [`CacheError::LoaderPanicked`] so
/// waiters are released.
pub struct LoadGuard<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    table: &'a InFlightTable<K, V>,
    key: BlockKey<K>,
    pending: Arc<PendingLoad<V>>,
    finished: bool,
}

impl<K, V> LoadGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn is_stale(&self) -> bool {
        self.pending.is_stale()
    }

    /// Publishes the outcome to all waiters and retires the slot.
    pub fn finish(mut self, outcome: Result<V>) {
        self.pending.complete(outcome);
        self.table.release(&self.key, &self.pending);
        self.finished = true;
    }
}

impl<K, V> Drop for LoadGuard<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.finished {
            self.pending
                .complete(Err(CacheError::LoaderPanicked(format!("{:?}", self.key))));
            self.table.release(&self.key, &self.pending);
        }
    }
}

// == Block Store ==
/// Storage operations a backend exposes to the shared load path.
pub(crate) trait BlockStore<K, V> {
    /// Returns the stored value and records the access.
    fn lookup(&self, key: &BlockKey<K>) -> Option<V>;
    /// Stores a freshly loaded value and enforces the budget.
    fn admit(&self, key: &BlockKey<K>, value: V);
    /// Removes a value admitted by a load that an invalidation overtook.
    fn retract(&self, key: &BlockKey<K>);
}

// == Load Through ==
/// Shared `get_or_load` path used by every backend.
///
/// The loader runs with no backend lock held. A successful result is admitted
/// before the in-flight slot is retired, so a caller arriving after
/// retirement finds the value in the store instead of loading again.
pub(crate) fn load_through<K, V, S>(
    store: &S,
    inflight: &InFlightTable<K, V>,
    stats: &CacheStats,
    key: &BlockKey<K>,
    loader: &mut dyn FnMut() -> anyhow::Result<V>,
) -> Result<V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    S: BlockStore<K, V>,
{
    if let Some(value) = store.lookup(key) {
        stats.record_hit();
        return Ok(value);
    }

    let guard = match inflight.claim(key) {
        Claim::Follower(pending) => {
            stats.record_coalesced();
            return pending.wait();
        }
        Claim::Leader(guard) => guard,
    };

    // A previous leader may have admitted the block between lookup and claim.
    if let Some(value) = store.lookup(key) {
        stats.record_hit();
        guard.finish(Ok(value.clone()));
        return Ok(value);
    }

    stats.record_miss();
    debug!(key = ?key, "block cache miss, loading");
    match loader() {
        Ok(value) => {
            stats.record_load(true);
            store.admit(key, value.clone());
            if guard.is_stale() {
                debug!(key = ?key, "load overtaken by invalidation, not retaining");
                store.retract(key);
            }
            guard.finish(Ok(value.clone()));
            Ok(value)
        }
        Err(err) => {
            stats.record_load(false);
            let err = CacheError::loader(err);
            guard.finish(Err(err.clone()));
            Err(err)
        }
    }
}
