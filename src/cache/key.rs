//! Block Key Module
//!
//! Composite identity of a cached block: (source, timepoint, level, block-local key).

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

// == Source Id ==
/// Identity handle for an image source.
///
/// Two sources are the same only if they share the handle minted by
/// [`SourceId::new`]; the content behind the source plays no part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Mints a new process-unique source identity.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for logging.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

// == Grid Cell ==
/// Default block-local key: the integer grid coordinate of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GridCell {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl GridCell {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }
}

// == Partial Key ==
/// The (source, timepoint, level) prefix shared by all blocks of one
/// resolution level of one timepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartialKey {
    pub source: SourceId,
    pub timepoint: u32,
    pub level: u32,
}

impl PartialKey {
    pub fn new(source: SourceId, timepoint: u32, level: u32) -> Self {
        Self {
            source,
            timepoint,
            level,
        }
    }

    /// Returns true if `key` belongs to this prefix.
    pub fn matches<K>(&self, key: &BlockKey<K>) -> bool {
        key.partial_eq(self.source, self.timepoint, self.level)
    }
}

impl fmt::Display for PartialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/t{}/l{}", self.source, self.timepoint, self.level)
    }
}

// == Block Key ==
/// Full identity of a cached block.
///
/// Equality and hashing cover all four components. Keys are created per
/// request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey<K = GridCell> {
    pub source: SourceId,
    pub timepoint: u32,
    pub level: u32,
    pub block: K,
}

impl<K> BlockKey<K> {
    // == Constructor ==
    pub fn new(source: SourceId, timepoint: u32, level: u32, block: K) -> Self {
        Self {
            source,
            timepoint,
            level,
            block,
        }
    }

    // == Partial Equality ==
    /// Compares only (source, timepoint, level), ignoring the block-local key.
    ///
    /// Used for bulk invalidation sweeps, never for lookups.
    pub fn partial_eq(&self, source: SourceId, timepoint: u32, level: u32) -> bool {
        self.source == source && self.timepoint == timepoint && self.level == level
    }

    /// Returns the (source, timepoint, level) prefix of this key.
    pub fn partial_key(&self) -> PartialKey {
        PartialKey::new(self.source, self.timepoint, self.level)
    }
}

impl<K: fmt::Debug> fmt::Display for BlockKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.partial_key(), self.block)
    }
}

/// Bounds every block-local key type must satisfy.
pub trait BlockLocalKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> BlockLocalKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}
