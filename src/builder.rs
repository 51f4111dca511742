//! Cache Manager Builder
//!
//! Assembles a [`CacheManager`] from a configuration, a backend and a codec.
//!
//! # Example: Default Backend
//!
//! ```rust,no_run
//! use odata_swr_cache::{CacheConfig, CacheManagerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheManagerBuilder::new()
//!         .with_config(CacheConfig::from_env())
//!         .build()?;
//!     cache.connect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use odata_swr_cache::CacheManagerBuilder;
//! use std::sync::Arc;
//!
//! let cache = CacheManagerBuilder::new()
//!     .with_backend(Arc::new(MyKeyValueStore::new()))
//!     .build()?;
//! ```

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::CacheManager;
use crate::backends::MemoryStore;
use crate::codecs::IdentityCodec;
use crate::config::CacheConfig;
use crate::traits::{CacheBackend, PayloadCodec};

/// Builder for [`CacheManager`]
///
/// # Default Behavior
///
/// - **Backend**: Redis at `config.redis_url` (feature `redis`), otherwise in-memory
/// - **Codec**: [`IdentityCodec`]
/// - **Config**: [`CacheConfig::default`]
#[derive(Default)]
pub struct CacheManagerBuilder {
    config: Option<CacheConfig>,
    backend: Option<Arc<dyn CacheBackend>>,
    codec: Option<Arc<dyn PayloadCodec>>,
}

impl CacheManagerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use any [`CacheBackend`] implementation
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Encode stored payloads, e.g. with `AesGcmCodec` (feature `encryption`)
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Use Redis at `url`
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a valid Redis connection string.
    #[cfg(feature = "redis")]
    pub fn with_redis_url(self, url: &str) -> Result<Self> {
        let backend = crate::backends::RedisStore::with_url(url)?;
        Ok(self.with_backend(Arc::new(backend)))
    }

    /// Use a fresh in-process [`MemoryStore`]
    #[must_use]
    pub fn with_memory(self) -> Self {
        self.with_backend(Arc::new(MemoryStore::new()))
    }

    /// Build the manager; it still has to be connected
    ///
    /// # Errors
    ///
    /// Returns an error if the default Redis backend cannot be created from
    /// `config.redis_url`.
    pub fn build(self) -> Result<CacheManager> {
        let config = self.config.unwrap_or_default();
        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend(&config)?,
        };
        let codec = self.codec.unwrap_or_else(|| Arc::new(IdentityCodec));

        info!(
            backend = backend.name(),
            codec = codec.name(),
            namespace = %config.namespace,
            enabled = config.enabled,
            "Building cache manager"
        );
        Ok(CacheManager::new(backend, codec, config))
    }
}

#[cfg(feature = "redis")]
fn default_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
    Ok(Arc::new(crate::backends::RedisStore::with_url(&config.redis_url)?))
}

#[cfg(not(feature = "redis"))]
#[allow(clippy::unnecessary_wraps)]
fn default_backend(_config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
    Ok(Arc::new(MemoryStore::new()))
}
