//! Cache Module
//!
//! Shared, memory-budgeted block cache backing image display: block keys,
//! the two backend implementations, configuration, and the builder.

mod backend;
mod builder;
mod configuration;
mod entry;
mod inflight;
mod key;
mod lru;
mod memory;
mod simple;
mod stats;
mod weighted;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use backend::{BackendKind, CacheBackend, EvictionListener, RemovalCause};
pub use builder::CacheBuilder;
pub use configuration::{
    CacheConfiguration, PersistedCacheConfig, SizingRule, CONFIG_SCHEMA_VERSION, MIB,
};
pub use entry::{BlockValue, CachedEntry, ImageBlock, Weigh, BLOCK_HEADER_BYTES};
pub use key::{BlockKey, BlockLocalKey, GridCell, PartialKey, SourceId};
pub use lru::LruTracker;
pub use memory::MemoryInfo;
pub use simple::SimpleBoundedCache;
pub use stats::{CacheStats, StatsSnapshot};
pub use weighted::WeightedConcurrentCache;
