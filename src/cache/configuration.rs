//! Cache Configuration Module
//!
//! Backend choice, sizing rule and reporting interval, plus the versioned
//! flat document the configuration is persisted as.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{BackendKind, MemoryInfo};
use crate::error::{CacheError, Result};

/// Bytes per MiB.
pub const MIB: u64 = 1024 * 1024;

/// Version written into every persisted document.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Marker used by the persisted document for an unset field.
const DISABLED: i64 = -1;

// == Sizing Rule ==
/// How the byte budget is derived. Exactly one rule is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingRule {
    /// Budget is this percentage of the memory available to the process
    RatioOfAvailableMemory { percent: u32 },
    /// Budget is exactly this many MiB
    FixedCacheBudget { mib: u64 },
    /// Budget is whatever remains after reserving this many MiB for everything else
    FixedReservedForRest { mib: u64 },
}

impl SizingRule {
    // == Resolve ==
    /// Turns the rule into a concrete byte budget.
    ///
    /// A budget that is not strictly positive is a configuration error.
    pub fn resolve(&self, memory: &MemoryInfo) -> Result<u64> {
        let total = memory.total_available();
        let budget = match *self {
            SizingRule::RatioOfAvailableMemory { percent } => {
                if !(1..=100).contains(&percent) {
                    return Err(CacheError::invalid_configuration(format!(
                        "memory ratio must be within 1..=100 percent, got {}",
                        percent
                    )));
                }
                ((total as u128 * percent as u128) / 100) as u64
            }
            SizingRule::FixedCacheBudget { mib } => mib.checked_mul(MIB).ok_or_else(|| {
                CacheError::invalid_configuration(format!("fixed budget of {} MiB overflows", mib))
            })?,
            SizingRule::FixedReservedForRest { mib } => {
                let reserved = mib.saturating_mul(MIB);
                total.checked_sub(reserved).ok_or_else(|| {
                    CacheError::invalid_configuration(format!(
                        "reserving {} MiB exceeds the {} MiB available",
                        mib,
                        total / MIB
                    ))
                })?
            }
        };

        if budget == 0 {
            return Err(CacheError::invalid_configuration(format!(
                "{:?} resolves to an empty cache budget",
                self
            )));
        }
        Ok(budget)
    }
}

// == Cache Configuration ==
/// Validated description of which backend to build and how large to make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    backend: BackendKind,
    sizing: SizingRule,
    stats_log_interval_ms: i64,
}

impl Default for CacheConfiguration {
    /// Weighted concurrent backend using half the available memory, no stats logging.
    fn default() -> Self {
        Self {
            backend: BackendKind::WeightedConcurrent,
            sizing: SizingRule::RatioOfAvailableMemory { percent: 50 },
            stats_log_interval_ms: DISABLED,
        }
    }
}

impl CacheConfiguration {
    // == Constructor ==
    pub fn new(backend: BackendKind, sizing: SizingRule) -> Self {
        Self {
            backend,
            sizing,
            stats_log_interval_ms: DISABLED,
        }
    }

    pub fn with_stats_log_interval_ms(mut self, interval_ms: i64) -> Self {
        self.stats_log_interval_ms = interval_ms;
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn sizing(&self) -> SizingRule {
        self.sizing
    }

    pub fn stats_log_interval_ms(&self) -> i64 {
        self.stats_log_interval_ms
    }

    /// Reporting cadence, or None when reporting is disabled.
    pub fn stats_log_interval(&self) -> Option<Duration> {
        (self.stats_log_interval_ms > 0).then(|| Duration::from_millis(self.stats_log_interval_ms as u64))
    }

    // == Setters ==
    // Each sizing setter replaces whichever rule was active.

    pub fn set_backend(&mut self, backend: BackendKind) {
        self.backend = backend;
    }

    pub fn set_ratio_of_memory(&mut self, percent: u32) {
        self.sizing = SizingRule::RatioOfAvailableMemory { percent };
    }

    pub fn set_fixed_budget_mb(&mut self, mib: u64) {
        self.sizing = SizingRule::FixedCacheBudget { mib };
    }

    pub fn set_reserved_for_rest_mb(&mut self, mib: u64) {
        self.sizing = SizingRule::FixedReservedForRest { mib };
    }

    pub fn set_stats_log_interval_ms(&mut self, interval_ms: i64) {
        self.stats_log_interval_ms = interval_ms;
    }

    /// Resolves the active sizing rule against `memory`.
    pub fn resolve_budget(&self, memory: &MemoryInfo) -> Result<u64> {
        self.sizing.resolve(memory)
    }

    // == Serialization ==
    /// Encodes the configuration as a flat JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&PersistedCacheConfig::from(self))?)
    }

    /// Strict decode; any malformed document is an error.
    pub fn try_from_json(document: &str) -> Result<Self> {
        let persisted: PersistedCacheConfig = serde_json::from_str(document)
            .map_err(|e| CacheError::invalid_configuration(e.to_string()))?;
        Self::try_from(persisted)
    }

    /// Lenient decode used at startup: malformed documents yield the default.
    pub fn from_json(document: &str) -> Self {
        match Self::try_from_json(document) {
            Ok(configuration) => configuration,
            Err(err) => {
                warn!(error = %err, "persisted cache configuration is malformed, using defaults");
                Self::default()
            }
        }
    }
}

// == Persisted Document ==
/// Schema v1 of the persisted configuration.
///
/// Sizing fields use -1 for "unset"; exactly one of them must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedCacheConfig {
    pub version: u32,
    pub cache_type: String,
    #[serde(default = "disabled")]
    pub log_ms: i64,
    #[serde(default = "disabled")]
    pub mem_ratio_pc: i64,
    #[serde(default = "disabled")]
    pub mem_for_cache_mb: i64,
    #[serde(default = "disabled")]
    pub mem_for_everything_else_mb: i64,
}

fn disabled() -> i64 {
    DISABLED
}

impl From<&CacheConfiguration> for PersistedCacheConfig {
    fn from(configuration: &CacheConfiguration) -> Self {
        let (mut ratio, mut fixed, mut reserved) = (DISABLED, DISABLED, DISABLED);
        match configuration.sizing {
            SizingRule::RatioOfAvailableMemory { percent } => ratio = percent as i64,
            SizingRule::FixedCacheBudget { mib } => fixed = clamp_i64(mib),
            SizingRule::FixedReservedForRest { mib } => reserved = clamp_i64(mib),
        }
        Self {
            version: CONFIG_SCHEMA_VERSION,
            cache_type: configuration.backend.as_str().to_string(),
            log_ms: configuration.stats_log_interval_ms,
            mem_ratio_pc: ratio,
            mem_for_cache_mb: fixed,
            mem_for_everything_else_mb: reserved,
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TryFrom<PersistedCacheConfig> for CacheConfiguration {
    type Error = CacheError;

    fn try_from(persisted: PersistedCacheConfig) -> Result<Self> {
        if persisted.version != CONFIG_SCHEMA_VERSION {
            return Err(CacheError::invalid_configuration(format!(
                "unsupported configuration version {}",
                persisted.version
            )));
        }
        let backend: BackendKind = persisted.cache_type.parse()?;

        let candidates = [
            (persisted.mem_ratio_pc, "mem_ratio_pc"),
            (persisted.mem_for_cache_mb, "mem_for_cache_mb"),
            (persisted.mem_for_everything_else_mb, "mem_for_everything_else_mb"),
        ];
        if let Some((value, name)) = candidates.iter().find(|(value, _)| *value < DISABLED) {
            return Err(CacheError::invalid_configuration(format!(
                "{} must be -1 or a non-negative number, got {}",
                name, value
            )));
        }
        let active: Vec<&str> = candidates
            .iter()
            .filter(|(value, _)| *value != DISABLED)
            .map(|(_, name)| *name)
            .collect();
        if active.len() != 1 {
            return Err(CacheError::invalid_configuration(format!(
                "exactly one sizing field must be set, found {:?}",
                active
            )));
        }

        // Ranges are checked when the budget is resolved, so a saved but
        // unusable size fails the build instead of reading as corrupt.
        let sizing = if persisted.mem_ratio_pc != DISABLED {
            let percent = u32::try_from(persisted.mem_ratio_pc).map_err(|_| {
                CacheError::invalid_configuration(format!(
                    "mem_ratio_pc out of range: {}",
                    persisted.mem_ratio_pc
                ))
            })?;
            SizingRule::RatioOfAvailableMemory { percent }
        } else if persisted.mem_for_cache_mb != DISABLED {
            SizingRule::FixedCacheBudget {
                mib: persisted.mem_for_cache_mb as u64,
            }
        } else {
            SizingRule::FixedReservedForRest {
                mib: persisted.mem_for_everything_else_mb as u64,
            }
        };

        Ok(Self {
            backend,
            sizing,
            stats_log_interval_ms: persisted.log_ms,
        })
    }
}
