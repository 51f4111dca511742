//! Key-Value Backend Implementations
//!
//! # Available Backends
//!
//! - **Redis** - distributed, shared across instances (feature `redis`, default)
//! - **Memory** - `DashMap`-based, single process; same semantics as Redis for TTL,
//!   SCAN globbing and pipelines
//!
//! # Usage
//!
//! ```rust,no_run
//! use odata_swr_cache::backends::MemoryStore;
//! # #[cfg(feature = "redis")]
//! use odata_swr_cache::backends::RedisStore;
//!
//! # fn example() -> anyhow::Result<()> {
//! let memory = MemoryStore::new();
//! # #[cfg(feature = "redis")]
//! let redis = RedisStore::with_url("redis://localhost:6379")?;
//! # Ok(())
//! # }
//! ```

pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory_store::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
