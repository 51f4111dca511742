//! Redis Store - Distributed Backend
//!
//! Redis-backed implementation of [`CacheBackend`] using `ConnectionManager` for
//! automatic reconnection.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DEFAULT_REDIS_URL;
use crate::traits::{CacheBackend, StoreOp, StoreReply};

/// Redis backend with lazy connection establishment
///
/// The client is created eagerly (URL validation only, no I/O); the connection is
/// opened by [`CacheBackend::connect`] and dropped by [`CacheBackend::disconnect`].
/// Every command issued while disconnected fails, which the
/// [`Store`](crate::store::Store) facade turns into a soft miss.
pub struct RedisStore {
    client: Client,
    redis_url: String,
    /// Redis connection manager - handles reconnection automatically
    conn_manager: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Create a Redis store from `REDIS_URL` (default `redis://127.0.0.1:6379`)
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn new() -> Result<Self> {
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        Self::with_url(&redis_url)
    }

    /// Create a Redis store with a custom URL
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn with_url(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        Ok(Self {
            client,
            redis_url: redis_url.to_string(),
            conn_manager: RwLock::new(None),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn_manager
            .read()
            .clone()
            .context("Redis store is not connected")
    }
}

fn reply_for(op: &StoreOp, value: redis::Value) -> StoreReply {
    match (op, value) {
        (StoreOp::Get { .. }, redis::Value::Nil) => StoreReply::Value(None),
        (StoreOp::Get { .. }, redis::Value::BulkString(bytes)) => StoreReply::Value(Some(bytes)),
        (StoreOp::Set { .. }, redis::Value::Okay) => StoreReply::Done(true),
        (StoreOp::Set { .. }, redis::Value::SimpleString(status)) => StoreReply::Done(status == "OK"),
        (StoreOp::Delete { .. } | StoreOp::Expire { .. }, redis::Value::Int(n)) => StoreReply::Done(n > 0),
        (StoreOp::Ttl { .. }, redis::Value::Int(secs)) => StoreReply::Ttl(secs),
        (_, redis::Value::ServerError(err)) => StoreReply::Failed(err.to_string()),
        (op, other) => StoreReply::Failed(format!("unexpected reply for {op:?}: {other:?}")),
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisStore {
    async fn connect(&self) -> Result<()> {
        info!(redis_url = %self.redis_url, "Connecting Redis Store with ConnectionManager");

        let conn_manager = ConnectionManager::new(self.client.clone())
            .await
            .context("Failed to establish Redis connection manager")?;

        // Test connection
        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        *self.conn_manager.write() = Some(conn_manager);
        info!(redis_url = %self.redis_url, "Redis Store connected successfully");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.conn_manager.write().take().is_some() {
            info!(redis_url = %self.redis_url, "Redis Store disconnected");
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Redis] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let count: usize = conn.del(key).await?;
        Ok(count > 0)
    }

    /// Uses Redis SCAN command (non-blocking, cursor-based iteration)
    /// and loops until the cursor returns to zero.
    async fn scan_keys(&self, pattern: &str, count: usize) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            // SCAN cursor MATCH pattern COUNT n
            let result: (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;

            cursor = result.0;
            keys.extend(result.1);

            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>> {
        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();
        // one failing command must not fail its siblings
        pipe.ignore_errors();

        for op in &ops {
            match op {
                StoreOp::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                StoreOp::Set { key, value, ttl } => {
                    pipe.cmd("SETEX").arg(key).arg(ttl.as_secs()).arg(value.as_slice());
                }
                StoreOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                StoreOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs());
                }
                StoreOp::Ttl { key } => {
                    pipe.cmd("TTL").arg(key);
                }
            }
        }

        let raw: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .context("Redis pipeline failed")?;

        debug!(commands = ops.len(), "[Redis] Executed pipeline");
        Ok(ops
            .iter()
            .zip(raw)
            .map(|(op, value)| reply_for(op, value))
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection()?;
        // TTL in seconds, -1 = no expiry, -2 = key doesn't exist
        let ttl_secs: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl_secs)
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.connection()?;
        let bytes: Option<u64> = redis::cmd("MEMORY")
            .arg("USAGE")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(bytes)
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
