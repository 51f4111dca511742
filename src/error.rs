//! Cache Error Taxonomy
//!
//! Internal failure kinds of the cache layer. None of these ever reach a caller of
//! the primary data path: the [`CacheManager`](crate::CacheManager) degrades them to
//! misses, `false` or empty results. They are surfaced verbatim only through the
//! diagnostic operations (validation, health).

use thiserror::Error;

/// Failure kinds inside the cache layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// Store disabled, not connected, or the backend rejected the command
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored bytes could not be turned back into a [`CacheEntry`](crate::CacheEntry)
    #[error("failed to decode cache entry: {0}")]
    Decode(String),

    /// Entry could not be serialized or encoded for storage
    #[error("failed to encode cache entry: {0}")]
    Encode(String),

    /// The caller-supplied fetch function failed
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// A time-boxed operation ran out of time
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A path expression could not be parsed
    #[error("invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl CacheError {
    /// Wrap any displayable error as a decode failure
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    /// Wrap any displayable error as an encode failure
    pub fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode(err.to_string())
    }
}
