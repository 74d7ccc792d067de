//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Stats reporter: logs cache size, weight and hit rate at the configured interval

mod stats_reporter;

pub use stats_reporter::{spawn_stats_reporter, StatsReporterHandle};
