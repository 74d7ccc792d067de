//! Cache Backend Module
//!
//! The capability interface every block cache implementation provides.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{BlockKey, SourceId, StatsSnapshot};
use crate::error::{CacheError, Result};

// == Backend Kind ==
/// The closed set of backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Sharded, byte-weighted, least-recently-used
    #[default]
    WeightedConcurrent,
    /// Single-lock, access-ordered fallback
    SimpleBounded,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::WeightedConcurrent => "WeightedConcurrent",
            BackendKind::SimpleBounded => "SimpleBounded",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WeightedConcurrent" => Ok(BackendKind::WeightedConcurrent),
            "SimpleBounded" => Ok(BackendKind::SimpleBounded),
            other => Err(CacheError::invalid_configuration(format!(
                "unknown cache type '{}'",
                other
            ))),
        }
    }
}

// == Removal Cause ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Evicted to bring the cache back under its budget
    Size,
    /// Removed by `invalidate`, `invalidate_matching` or `invalidate_all`
    Explicit,
}

/// Hook run after an entry has been removed, e.g. to release native memory
/// held by the payload.
pub type EvictionListener<K, V> = Arc<dyn Fn(&BlockKey<K>, &V, RemovalCause) + Send + Sync>;

// == Cache Backend ==
/// A memory-budgeted block cache shared by all rendering workers.
pub trait CacheBackend<K, V>: Send + Sync {
    /// Returns the cached block, or runs `loader` to produce it.
    ///
    /// Concurrent callers for the same key share one loader invocation and
    /// all observe its value or its failure. A failure is not cached.
    fn get_or_load(
        &self,
        key: &BlockKey<K>,
        loader: &mut dyn FnMut() -> anyhow::Result<V>,
    ) -> Result<V>;

    /// Returns the cached block without loading it.
    fn get_if_present(&self, key: &BlockKey<K>) -> Option<V>;

    /// Removes one entry. Absent keys are ignored.
    fn invalidate(&self, key: &BlockKey<K>);

    /// Removes every entry of (source, timepoint, level), whatever its block-local key.
    fn invalidate_matching(&self, source: SourceId, timepoint: u32, level: u32);

    /// Removes every entry.
    fn invalidate_all(&self);

    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total weight of stored entries in bytes.
    fn current_weight(&self) -> u64;

    /// Byte budget the cache is held to.
    fn budget(&self) -> u64;

    fn stats(&self) -> StatsSnapshot;

    fn kind(&self) -> BackendKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(
            "WeightedConcurrent".parse::<BackendKind>().unwrap(),
            BackendKind::WeightedConcurrent
        );
        assert_eq!(
            "SimpleBounded".parse::<BackendKind>().unwrap(),
            BackendKind::SimpleBounded
        );
        assert!(matches!(
            "SoftRef".parse::<BackendKind>(),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_backend_kind_display_round_trips() {
        for kind in [BackendKind::WeightedConcurrent, BackendKind::SimpleBounded] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }
}
