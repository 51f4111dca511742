//! OData SWR Cache
//!
//! A stale-while-revalidate cache manager for responses of a remote, rate-limited
//! OData-style backend, featuring:
//! - **Stale-While-Revalidate**: stale entries are served immediately and refreshed
//!   in the background
//! - **Single-Flight Revalidation**: at most one upstream fetch per key, fed through a
//!   rate-limited sequential worker
//! - **Envelope-Agnostic Partial Updates**: per-item update / insert / remove in
//!   `d.results`, `value`, named collections, bare arrays and single entities
//! - **Pattern Fan-Out**: keep every cached representation of an entity consistent
//! - **Pipelined Batches**: bulk update, delete and TTL change in one round trip
//! - **Fail-Soft**: the cache never fails the primary data path
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use odata_swr_cache::{CacheManager, RevalidationOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheManager::builder().build()?;
//!     cache.connect().await;
//!
//!     let key = cache.keys("tenant-a.example.com").key("GET", "/Items('42')", None);
//!     let item = cache
//!         .get_or_fetch(&key, || async { Ok(json!({"d": {"Id": "42", "Status": "NEW"}})) }, RevalidationOptions::default())
//!         .await?;
//!     tracing::info!("item: {item}");
//!
//!     // A status change upstream: patch the cached copy instead of dropping it
//!     cache.update_field(&key, "data.d.Status", json!("STARTED")).await;
//!
//!     cache.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! read → Store ─ fresh ─────────────→ return
//!              ├ stale → return, schedule ─→ dedup map ─→ queue → worker → fetch → merge/replace → Store
//!              └ miss ─→ single-flight fetch → Store → return
//! ```

pub mod backends;
pub mod batch;
pub mod builder;
pub mod cache_manager;
pub mod codecs;
pub mod config;
mod engine;
pub mod entry;
pub mod envelope;
pub mod error;
pub mod glob;
pub mod keys;
pub mod path;
pub mod revalidation;
pub mod stats;
pub mod store;
pub mod traits;
pub mod validation;
pub mod warmer;

pub use backends::MemoryStore;
#[cfg(feature = "redis")]
pub use backends::RedisStore;
pub use batch::{BatchResult, BatchTtlUpdate, BatchUpdate};
pub use builder::CacheManagerBuilder;
pub use cache_manager::CacheManager;
#[cfg(feature = "encryption")]
pub use codecs::AesGcmCodec;
pub use codecs::IdentityCodec;
pub use config::CacheConfig;
pub use engine::RevalidationOutcome;
pub use entry::{CacheEntry, TtlOptions};
pub use envelope::{EnvelopeReconciler, EnvelopeShape, InsertOptions, MergeOutcome, RemoveOptions};
pub use error::CacheError;
pub use keys::{KeyBuilder, PatternIndex};
pub use path::{FieldPath, PathAccessor, PathStep};
pub use revalidation::{
    FetchFn, FetchFuture, PayloadValidator, RevalidationOptions, RevalidationState, ScheduleOutcome, fetch_fn,
};
pub use stats::{CacheHealth, CacheManagerStats, CacheStats, EndpointStats, KeyInfo};
pub use store::Store;
pub use traits::{CacheBackend, PayloadCodec, StoreOp, StoreReply};
pub use validation::{PatternValidationReport, ValidationReport};
pub use warmer::{WarmEntry, WarmOptions, WarmReport};

// Re-export async_trait for user convenience
pub use async_trait::async_trait;
