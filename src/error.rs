//! Error types for the block cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the block cache.
///
/// The type is `Clone` because a single loader failure is delivered to
/// every caller waiting on the same in-flight block.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Configuration resolved to something the cache cannot be built from
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller-supplied block loader failed
    #[error("Block loader failed: {0}")]
    Loader(Arc<anyhow::Error>),

    /// The block loader panicked before producing a result
    #[error("Block loader panicked: {0}")]
    LoaderPanicked(String),

    /// Reading or writing the preference store failed
    #[error("Preference store error: {0}")]
    Preferences(#[source] Arc<std::io::Error>),

    /// Encoding or decoding a JSON document failed
    #[error("Serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),
}

impl CacheError {
    /// Wraps a loader failure so it can be shared between waiters.
    pub fn loader(err: anyhow::Error) -> Self {
        CacheError::Loader(Arc::new(err))
    }

    /// Creates a new configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        CacheError::InvalidConfiguration(msg.into())
    }
}

// Sources are held in an `Arc` so the error stays `Clone`.
impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Preferences(Arc::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(Arc::new(err))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the block cache.
pub type Result<T> = std::result::Result<T, CacheError>;
