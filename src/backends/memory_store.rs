//! Memory Store - In-Process Redis-Compatible Backend
//!
//! A `DashMap`-backed implementation of the full [`CacheBackend`] contract: per-key
//! expiry, glob SCAN, TTL codes, pipelines and size approximation. Useful for tests,
//! single-process deployments, and as a reference for custom backends.

use anyhow::{Result, bail};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::glob::compile_glob;
use crate::traits::{CacheBackend, StoreOp, StoreReply, TTL_MISSING, TTL_NO_EXPIRY};

/// Stored bytes with expiration tracking
#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// Default period of the background expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Concurrent in-memory key-value store with Redis semantics
///
/// **Features**:
/// - Lock-free concurrent reads/writes
/// - Lazy expiry on access, plus a periodic sweep started by `connect`
///   (see [`with_sweep_interval`](Self::with_sweep_interval))
/// - Redis glob matching for `scan_keys`
/// - Simulated outages via [`set_available`](Self::set_available)
///
/// **Example**:
/// ```rust
/// use odata_swr_cache::backends::MemoryStore;
/// use odata_swr_cache::CacheBackend;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let store = MemoryStore::new();
/// store.set_with_ttl("user:1", b"alice", Duration::from_secs(60)).await?;
/// assert_eq!(store.get("user:1").await?, Some(b"alice".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    map: Arc<DashMap<String, StoredValue>>,
    available: AtomicBool,
    /// Round trips served (a pipeline counts once)
    commands: AtomicU64,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing Memory Store (DashMap)");

        Self {
            map: Arc::new(DashMap::new()),
            available: AtomicBool::new(true),
            commands: AtomicU64::new(0),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweeper: Mutex::new(None),
        }
    }

    /// Change how often `connect`'s background task drops expired keys
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Simulate a backend outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of round trips served so far
    #[must_use]
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        sweep(&self.map)
    }

    /// Whether the background sweep task is running
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        // The task only holds a weak handle, so dropping the store ends it
        let map = Arc::downgrade(&self.map);
        let every = self.sweep_interval.max(Duration::from_millis(1));
        *sweeper = Some(tokio::spawn(sweep_loop(map, every)));
        debug!(interval_ms = every.as_millis(), "[Memory] Started expiry sweeper");
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Get current number of (possibly expired) keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn round_trip(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("memory store unavailable");
        }
        self.commands.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_now(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.map.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.map.remove(key);
            None
        } else {
            Some(entry.value.clone())
        }
    }

    fn set_now(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        if ttl.is_zero() {
            // SETEX rejects a zero TTL
            return false;
        }
        self.map
            .insert(key.to_string(), StoredValue::new(value.to_vec(), ttl));
        true
    }

    fn remove_now(&self, key: &str) -> bool {
        self.map
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired())
    }

    fn expire_now(&self, key: &str, ttl: Duration) -> bool {
        match self.map.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        }
    }

    fn ttl_now(&self, key: &str) -> i64 {
        match self.map.get(key) {
            None => TTL_MISSING,
            Some(entry) => match entry.expires_at {
                None => TTL_NO_EXPIRY,
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        TTL_MISSING
                    } else {
                        // Redis rounds to the nearest second
                        i64::try_from((remaining.as_millis() + 500) / 1000).unwrap_or(i64::MAX)
                    }
                }
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

fn sweep(map: &DashMap<String, StoredValue>) -> usize {
    let mut removed = 0;
    map.retain(|_, entry| {
        if entry.is_expired() {
            removed += 1;
            false
        } else {
            true
        }
    });
    if removed > 0 {
        debug!(count = removed, "[Memory] Cleaned up expired entries");
    }
    removed
}

async fn sweep_loop(map: Weak<DashMap<String, StoredValue>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(map) = map.upgrade() else {
            break;
        };
        sweep(&map);
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryStore {
    async fn connect(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("memory store unavailable");
        }
        self.start_sweeper();
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop_sweeper();
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.round_trip()?;
        Ok(self.get_now(key))
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.round_trip()?;
        if !self.set_now(key, value, ttl) {
            bail!("invalid expire time in 'setex' command");
        }
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Memory] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.round_trip()?;
        Ok(self.remove_now(key))
    }

    async fn scan_keys(&self, pattern: &str, _count: usize) -> Result<Vec<String>> {
        self.round_trip()?;
        let matcher = compile_glob(pattern)?;
        let mut keys: Vec<String> = self
            .map
            .iter()
            .filter(|entry| !entry.value().is_expired() && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        debug!(pattern = %pattern, count = keys.len(), "[Memory] Scanned keys matching pattern");
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>> {
        self.round_trip()?;
        let replies = ops
            .into_iter()
            .map(|op| match op {
                StoreOp::Get { key } => StoreReply::Value(self.get_now(&key)),
                StoreOp::Set { key, value, ttl } => {
                    if self.set_now(&key, &value, ttl) {
                        StoreReply::Done(true)
                    } else {
                        StoreReply::Failed("invalid expire time in 'setex' command".to_string())
                    }
                }
                StoreOp::Delete { key } => StoreReply::Done(self.remove_now(&key)),
                StoreOp::Expire { key, ttl } => StoreReply::Done(self.expire_now(&key, ttl)),
                StoreOp::Ttl { key } => StoreReply::Ttl(self.ttl_now(&key)),
            })
            .collect();
        Ok(replies)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.round_trip()?;
        Ok(self.ttl_now(key))
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        self.round_trip()?;
        Ok(self
            .get_now(key)
            .map(|value| (key.len() + value.len()) as u64))
    }

    async fn health_check(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ttl_codes() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", b"v", Duration::from_secs(100))
            .await
            .unwrap();

        let ttl = store.ttl("k").await.unwrap();
        assert!((99..=100).contains(&ttl), "ttl was {ttl}");
        assert_eq!(store.ttl("missing").await.unwrap(), TTL_MISSING);
    }

    #[tokio::test]
    async fn test_expired_keys_disappear() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("short", b"v", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.scan_keys("*", 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_drops_expired_keys() {
        let store = MemoryStore::new().with_sweep_interval(Duration::from_millis(10));
        store.connect().await.unwrap();
        assert!(store.is_sweeping());

        store
            .set_with_ttl("short", b"v", Duration::from_millis(20))
            .await
            .unwrap();
        store
            .set_with_ttl("long", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // never read back, so only the sweep can have removed it
        assert_eq!(store.len(), 1);

        store.disconnect().await;
        assert!(!store.is_sweeping());
    }

    #[tokio::test]
    async fn test_pipeline_replies_in_order() {
        let store = MemoryStore::new();
        let replies = store
            .pipeline(vec![
                StoreOp::Set {
                    key: "a".into(),
                    value: b"1".to_vec(),
                    ttl: Duration::from_secs(10),
                },
                StoreOp::Get { key: "a".into() },
                StoreOp::Get { key: "b".into() },
                StoreOp::Delete { key: "a".into() },
                StoreOp::Ttl { key: "a".into() },
            ])
            .await
            .unwrap();

        assert_eq!(
            replies,
            vec![
                StoreReply::Done(true),
                StoreReply::Value(Some(b"1".to_vec())),
                StoreReply::Value(None),
                StoreReply::Done(true),
                StoreReply::Ttl(TTL_MISSING),
            ]
        );
        assert_eq!(store.command_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.get("k").await.is_err());
        assert!(!store.health_check().await);
    }
}
