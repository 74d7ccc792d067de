//! Configuration Module
//!
//! Process-level settings for the block cache service, loaded from
//! environment variables. The cache's own sizing lives in the persisted
//! preference, not here.

use std::env;
use std::path::PathBuf;

use crate::cache::MemoryInfo;

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Preference file holding the persisted cache configuration
    pub preferences_path: PathBuf,
    /// Overrides detected memory, in MiB
    pub memory_override_mb: Option<u64>,
    /// Number of synthetic rendering workers to run
    pub demo_workers: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `BLOCK_CACHE_PREFS` - Preference file path (default: block-cache-prefs.json)
    /// - `BLOCK_CACHE_MEMORY_MB` - Memory available to the process (default: detected)
    /// - `BLOCK_CACHE_DEMO_WORKERS` - Synthetic rendering workers (default: 4)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            preferences_path: env::var("BLOCK_CACHE_PREFS")
                .map(PathBuf::from)
                .unwrap_or(defaults.preferences_path),
            memory_override_mb: env::var("BLOCK_CACHE_MEMORY_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|mb| *mb > 0),
            demo_workers: env::var("BLOCK_CACHE_DEMO_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.demo_workers),
        }
    }

    /// Memory figure the cache budget is resolved against.
    pub fn memory_info(&self) -> MemoryInfo {
        match self.memory_override_mb {
            Some(mb) => MemoryInfo::from_total_mb(mb),
            None => MemoryInfo::detect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferences_path: PathBuf::from("block-cache-prefs.json"),
            memory_override_mb: None,
            demo_workers: 4,
        }
    }
}
