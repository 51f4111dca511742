//! Store - Fail-Soft Facade Over a Backend
//!
//! Every operation degrades instead of failing: an unavailable, disabled or
//! erroring backend yields `None` / `false` / empty results and a `debug!` line.
//! Nothing here can fail the caller's primary data path, and the whole cache can
//! run with the store switched off.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::traits::{CacheBackend, StoreOp, StoreReply, TTL_MISSING};

/// Fail-soft access to a [`CacheBackend`]
pub struct Store {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    connected: AtomicBool,
    scan_count: usize,
}

impl Store {
    /// Wrap a backend. The store starts disconnected.
    pub fn new(backend: Arc<dyn CacheBackend>, enabled: bool, scan_count: usize) -> Self {
        Self {
            backend,
            enabled,
            connected: AtomicBool::new(false),
            scan_count: scan_count.max(1),
        }
    }

    /// Enabled by configuration and currently connected
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.enabled && self.connected.load(Ordering::SeqCst)
    }

    /// Enabled by configuration
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Name of the wrapped backend
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Connect the backend; `false` if disabled or the connection failed
    pub async fn connect(&self) -> bool {
        if !self.enabled {
            info!(backend = self.backend.name(), "Cache store disabled by configuration, not connecting");
            return false;
        }
        match self.backend.connect().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(backend = self.backend.name(), "Cache store connected");
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(backend = self.backend.name(), error = %e, "Cache store connection failed, running without cache");
                false
            }
        }
    }

    /// Disconnect the backend
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.backend.disconnect().await;
        }
    }

    fn unavailable(&self, op: &str, key: &str) -> bool {
        if self.is_available() {
            return false;
        }
        debug!(op = op, key = %key, "Cache store unavailable, skipping");
        true
    }

    /// Raw bytes stored under `key`
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if self.unavailable("get", key) {
            return None;
        }
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key = %key, error = %e, "Cache get failed");
                None
            }
        }
    }

    /// Store bytes with a TTL; zero TTLs are refused
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        if self.unavailable("set", key) {
            return false;
        }
        if ttl.as_secs() == 0 {
            debug!(key = %key, "Refusing to cache with a TTL under one second");
            return false;
        }
        match self.backend.set_with_ttl(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %key, error = %e, "Cache set failed");
                false
            }
        }
    }

    /// Delete `key`; `true` if it existed
    pub async fn delete(&self, key: &str) -> bool {
        if self.unavailable("delete", key) {
            return false;
        }
        match self.backend.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                debug!(key = %key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Every key matching `pattern` (exhaustive cursor scan)
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        if self.unavailable("scan", pattern) {
            return Vec::new();
        }
        match self.backend.scan_keys(pattern, self.scan_count).await {
            Ok(keys) => keys,
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "Cache scan failed");
                Vec::new()
            }
        }
    }

    /// Run `ops` in one round trip
    ///
    /// Always returns one reply per op; a failed round trip yields
    /// [`StoreReply::Failed`] for every op. Empty input issues no command.
    pub async fn pipeline(&self, ops: Vec<StoreOp>) -> Vec<StoreReply> {
        if ops.is_empty() {
            return Vec::new();
        }
        let failed = |n: usize, reason: &str| vec![StoreReply::Failed(reason.to_string()); n];
        let count = ops.len();

        if self.unavailable("pipeline", ops.first().map_or("", StoreOp::key)) {
            return failed(count, "store unavailable");
        }
        // SETEX/EXPIRE reject a zero TTL and would poison the batch
        let (ops, refused): (Vec<_>, Vec<_>) = ops.into_iter().enumerate().partition(|(_, op)| match op {
            StoreOp::Set { ttl, .. } | StoreOp::Expire { ttl, .. } => ttl.as_secs() > 0,
            _ => true,
        });
        let indices: Vec<usize> = ops.iter().map(|(i, _)| *i).collect();
        let ops: Vec<StoreOp> = ops.into_iter().map(|(_, op)| op).collect();

        let mut replies = failed(count, "ttl must be at least one second");
        if !ops.is_empty() {
            match self.backend.pipeline(ops).await {
                Ok(results) => {
                    for (i, reply) in indices.into_iter().zip(results) {
                        if let Some(slot) = replies.get_mut(i) {
                            *slot = reply;
                        }
                    }
                }
                Err(e) => {
                    debug!(commands = count, error = %e, "Cache pipeline failed");
                    return failed(count, &e.to_string());
                }
            }
        }
        if !refused.is_empty() {
            debug!(refused = refused.len(), "Refused pipelined writes with sub-second TTL");
        }
        replies
    }

    /// Remaining TTL in seconds (-1 no expiry, -2 missing or unavailable)
    pub async fn ttl(&self, key: &str) -> i64 {
        if self.unavailable("ttl", key) {
            return TTL_MISSING;
        }
        self.backend.ttl(key).await.unwrap_or_else(|e| {
            debug!(key = %key, error = %e, "Cache ttl failed");
            TTL_MISSING
        })
    }

    /// Approximate memory used by `key`
    ///
    /// Expensive (O(size of value) on the server); for diagnostics only.
    pub async fn approximate_size(&self, key: &str) -> Option<u64> {
        if self.unavailable("memory_usage", key) {
            return None;
        }
        self.backend.memory_usage(key).await.unwrap_or_else(|e| {
            debug!(key = %key, error = %e, "Cache memory usage query failed");
            None
        })
    }

    /// Backend reachability (`false` while unavailable)
    pub async fn health_check(&self) -> bool {
        self.is_available() && self.backend.health_check().await
    }
}
