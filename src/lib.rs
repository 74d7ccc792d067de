//! Block Cache - shared block storage for multi-resolution image viewers
//!
//! A process-wide, memory-budgeted, concurrent cache mapping
//! (source, timepoint, resolution level, block-local key) to decoded blocks.

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod tasks;

pub use cache::{BlockKey, CacheBackend, CacheBuilder, CacheConfiguration, GridCell, SourceId};
pub use config::Config;
pub use error::{CacheError, Result};
pub use registry::CacheRegistry;
pub use tasks::spawn_stats_reporter;
