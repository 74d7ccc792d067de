//! Cache Entry Module
//!
//! Defines cached payloads, their byte weights, and the per-entry recency stamp.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// == Weigh ==
/// Estimated memory footprint of a cached payload, in bytes.
pub trait Weigh {
    fn weight(&self) -> u64;
}

impl<T> Weigh for Vec<T> {
    fn weight(&self) -> u64 {
        (self.len() * mem::size_of::<T>()) as u64
    }
}

impl<T> Weigh for Box<[T]> {
    fn weight(&self) -> u64 {
        (self.len() * mem::size_of::<T>()) as u64
    }
}

impl<T: Weigh + ?Sized> Weigh for Arc<T> {
    fn weight(&self) -> u64 {
        (**self).weight()
    }
}

/// Bounds every cached payload type must satisfy.
///
/// Readers receive clones, so payloads are normally cheap handles such as `Arc`.
pub trait BlockValue: Weigh + Clone + Send + Sync + 'static {}

impl<T> BlockValue for T where T: Weigh + Clone + Send + Sync + 'static {}

// == Image Block ==
/// Fixed accounting overhead charged per decoded block.
pub const BLOCK_HEADER_BYTES: u64 = 64;

/// A decoded block of voxels.
///
/// The data buffer is reference counted so a reader keeps it alive after
/// the cache has dropped the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlock {
    /// Block extent in voxels (x, y, z)
    pub shape: [u32; 3],
    /// Raw voxel data
    pub data: Arc<[u8]>,
}

impl ImageBlock {
    pub fn new(shape: [u32; 3], data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            shape,
            data: data.into(),
        }
    }
}

impl Weigh for ImageBlock {
    fn weight(&self) -> u64 {
        self.data.len() as u64 + BLOCK_HEADER_BYTES
    }
}

// == Cached Entry ==
/// A stored payload with its weight and last-access tick.
///
/// The payload and weight never change after insertion; only the tick moves.
#[derive(Debug)]
pub struct CachedEntry<V> {
    /// The stored payload
    pub value: V,
    /// Weight charged against the budget
    pub weight: u64,
    /// Logical time of the most recent access
    last_access: AtomicU64,
}

impl<V: Weigh> CachedEntry<V> {
    // == Constructor ==
    /// Wraps a freshly loaded payload, stamping it with `tick`.
    pub fn new(value: V, tick: u64) -> Self {
        let weight = value.weight();
        Self {
            value,
            weight,
            last_access: AtomicU64::new(tick),
        }
    }
}

impl<V> CachedEntry<V> {
    // == Touch ==
    /// Records an access at logical time `tick`.
    pub fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    /// Logical time of the most recent access.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}
