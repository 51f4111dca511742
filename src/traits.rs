//! Cache Backend Traits
//!
//! This module defines the trait abstractions that allow users to plug in custom
//! key-value backends and payload codecs.
//!
//! # Architecture
//!
//! - `CacheBackend`: Redis-compatible key-value operations (GET/SETEX/DEL/SCAN/TTL,
//!   pipelines, memory usage)
//! - `PayloadCodec`: symmetric byte transformation applied to serialized entries
//!   (e.g. at-rest encryption)
//!
//! Backends report failures as `anyhow` errors. They are never shown to cache
//! consumers: the [`Store`](crate::store::Store) facade turns every failure into a
//! miss / `false` / empty result.
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use odata_swr_cache::{CacheBackend, StoreOp, StoreReply, async_trait};
//! use std::time::Duration;
//! use anyhow::Result;
//!
//! struct MyKeyValueStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheBackend for MyKeyValueStore {
//!     async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     // ... set_with_ttl, remove, scan_keys, pipeline, ttl, memory_usage, health_check
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// TTL reply for a key that exists without expiry
pub const TTL_NO_EXPIRY: i64 = -1;
/// TTL reply for a key that does not exist (or already expired)
pub const TTL_MISSING: i64 = -2;

/// One command inside a pipelined batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `GET key`
    Get { key: String },
    /// `SETEX key ttl value`
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },
    /// `DEL key`
    Delete { key: String },
    /// `EXPIRE key ttl`
    Expire { key: String, ttl: Duration },
    /// `TTL key`
    Ttl { key: String },
}

impl StoreOp {
    /// Key the command targets
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::Delete { key }
            | Self::Expire { key, .. }
            | Self::Ttl { key } => key,
        }
    }
}

/// Reply to one [`StoreOp`], positionally matched to the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReply {
    /// Reply to `Get`
    Value(Option<Vec<u8>>),
    /// Reply to `Set`, `Delete` and `Expire`: whether the command took effect
    Done(bool),
    /// Reply to `Ttl` (seconds, or [`TTL_NO_EXPIRY`] / [`TTL_MISSING`])
    Ttl(i64),
    /// The command failed; the rest of the batch is unaffected
    Failed(String),
}

impl StoreReply {
    /// Bytes of a `Get` reply, `None` for anything else
    #[must_use]
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Self::Value(v) => v,
            _ => None,
        }
    }

    /// Whether the command succeeded and took effect
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(true))
    }

    /// Seconds of a `Ttl` reply, [`TTL_MISSING`] for anything else
    #[must_use]
    pub fn ttl_secs(&self) -> i64 {
        match self {
            Self::Ttl(secs) => *secs,
            _ => TTL_MISSING,
        }
    }
}

/// Redis-compatible key-value backend
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access across async tasks.
///
/// # Performance Considerations
///
/// - `get` / `set_with_ttl` are on the hot path
/// - `scan_keys` must iterate a cursor to exhaustion, never a single partial call
/// - `memory_usage` is O(size of value); only diagnostics should call it
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Establish the connection. Backends without a connection return `Ok(())`.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Drop the connection. Subsequent calls fail until `connect` is called again.
    async fn disconnect(&self) {}

    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `SETEX key ttl value`
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// `DEL key`; `true` if a key was removed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Every key matching a glob pattern (`*`, `?`, `[...]`)
    ///
    /// `count` is the per-iteration hint passed to `SCAN ... COUNT`.
    async fn scan_keys(&self, pattern: &str, count: usize) -> Result<Vec<String>>;

    /// Execute all commands in a single round trip
    ///
    /// Replies are returned in request order. Not atomic.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>>;

    /// `TTL key` (seconds, -1 no expiry, -2 missing)
    async fn ttl(&self, key: &str) -> Result<i64>;

    /// Approximate bytes used by a key, `None` if the key is missing
    ///
    /// Expensive: never call on a hot path.
    async fn memory_usage(&self, key: &str) -> Result<Option<u64>>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Get the name of this backend (for logging)
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Symmetric transformation of serialized entries before they hit the store
///
/// `decode(encode(x)) == x` must hold. Implementations should prefix their output
/// with a version marker so the format can evolve.
///
/// # Example: Custom Codec
///
/// ```rust,ignore
/// use odata_swr_cache::PayloadCodec;
/// use anyhow::Result;
///
/// #[derive(Debug)]
/// struct Rot13;
///
/// impl PayloadCodec for Rot13 {
///     fn encode(&self, plain: &[u8]) -> Result<Vec<u8>> { /* ... */ }
///     fn decode(&self, stored: &[u8]) -> Result<Vec<u8>> { /* ... */ }
///     fn name(&self) -> &'static str { "rot13" }
/// }
/// ```
pub trait PayloadCodec: Send + Sync + Debug {
    /// Transform serialized bytes for storage
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    fn encode(&self, plain: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`encode`](Self::encode)
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes were not produced by this codec or are corrupted.
    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>>;

    /// Name of the codec (for logging)
    fn name(&self) -> &'static str;
}
