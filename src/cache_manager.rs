//! Cache Manager - Stale-While-Revalidate Operations
//!
//! One explicit manager per backend connection. Every method degrades instead of
//! failing: a disabled, disconnected or erroring store turns reads into misses,
//! writes into `false` and scans into empty results. Only [`CacheManager::get_or_fetch`]
//! can return an error, and only the caller's own fetch error.
//!
//! # Path conventions
//!
//! Field paths given to [`update_field`](CacheManager::update_field),
//! [`update_fields`](CacheManager::update_fields),
//! [`update_in_array`](CacheManager::update_in_array) and
//! [`batch_update`](CacheManager::batch_update) address the stored entry, so payload
//! fields sit under `data` (`data.d.results[0].Status`). Array paths in
//! [`InsertOptions`] / [`RemoveOptions`] address the payload itself.

use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::batch::{BatchExecutor, BatchResult, BatchTtlUpdate, BatchUpdate};
use crate::builder::CacheManagerBuilder;
use crate::config::CacheConfig;
use crate::engine::{CacheEngine, apply_paths, parse_updates};
use crate::entry::{CacheEntry, TtlOptions};
use crate::envelope::{InsertOptions, RemoveOptions};
use crate::keys::KeyBuilder;
use crate::path::FieldPath;
use crate::revalidation::{
    CleanupGuard, RevalidationOptions, RevalidationState, Revalidator, ScheduleOutcome, fetch_fn,
};
use crate::stats::{
    CacheHealth, CacheManagerStats, CacheStats, EndpointStats, KeyInfo, RuntimeCounters, StatsCollector,
};
use crate::store::Store;
use crate::traits::{CacheBackend, PayloadCodec};
use crate::validation::{self, PatternValidationReport, ValidationReport};
use crate::warmer::{self, WarmEntry, WarmOptions, WarmReport};

/// Cache Manager - entry lifecycle, background revalidation and partial updates
pub struct CacheManager {
    engine: Arc<CacheEngine>,
    revalidator: Revalidator,
    /// In-flight upstream fetches on cache miss, to prevent a stampede
    in_flight_requests: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CacheManager {
    /// Create a manager over `backend`; call [`connect`](Self::connect) before use
    pub fn new(backend: Arc<dyn CacheBackend>, codec: Arc<dyn PayloadCodec>, config: CacheConfig) -> Self {
        let store = Store::new(backend, config.enabled, config.scan_count);
        let engine = Arc::new(CacheEngine::new(store, codec, config));
        Self {
            revalidator: Revalidator::new(Arc::clone(&engine)),
            engine,
            in_flight_requests: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.engine.config
    }

    /// Key builder for one tenant in this manager's namespace
    #[must_use]
    pub fn keys(&self, hostname: &str) -> KeyBuilder {
        KeyBuilder::new(&self.engine.config.namespace, hostname)
    }

    /// Store enabled and connected
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.engine.store.is_available()
    }

    // ===== Lifecycle =====

    /// Connect the store and start the revalidation worker
    ///
    /// Returns `false` when the cache is disabled or unreachable; the manager then
    /// keeps working as a pass-through.
    pub async fn connect(&self) -> bool {
        if !self.engine.store.connect().await {
            return false;
        }
        self.revalidator.start();
        true
    }

    /// Stop background work and disconnect
    ///
    /// Waits at most `shutdown_grace` for queued revalidations, then drops whatever is
    /// still in flight.
    pub async fn close(&self) {
        let drained = self.revalidator.shutdown(self.engine.config.shutdown_grace).await;
        self.in_flight_requests.clear();
        self.engine.store.disconnect().await;
        info!(drained, "Cache manager closed");
    }

    // ===== Entries =====

    /// Cached entry, fresh or stale
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let counters = &self.engine.counters;
        match self.engine.read_entry(key).await {
            Some(entry) => {
                if entry.is_stale() {
                    RuntimeCounters::bump(&counters.stale_hits);
                } else {
                    RuntimeCounters::bump(&counters.hits);
                }
                Some(entry)
            }
            None => {
                RuntimeCounters::bump(&counters.misses);
                None
            }
        }
    }

    /// Store `data` as a new entry (configured TTLs when `ttl` is `None`)
    pub async fn set(&self, key: &str, data: Value, ttl: Option<TtlOptions>) -> bool {
        let ttl = ttl.unwrap_or_else(|| self.engine.default_ttl());
        self.engine.write_entry(key, &CacheEntry::new(data, &ttl)).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.engine.store.delete(key).await
    }

    /// Delete every primary key matching `pattern`, returning how many were removed
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let keys = self.find_keys_by_pattern(pattern).await;
        let deleted = BatchExecutor::new(&self.engine).delete(&keys).await;
        debug!(pattern = %pattern, matched = keys.len(), deleted, "Deleted keys by pattern");
        deleted
    }

    /// Primary keys matching `pattern` (other tenants and metadata keys excluded)
    pub async fn find_keys_by_pattern(&self, pattern: &str) -> Vec<String> {
        self.engine.patterns.keys_for(&self.engine.store, pattern).await
    }

    /// Stale-while-revalidate read
    ///
    /// - fresh hit: returned as is
    /// - stale hit: returned immediately, `fetch` runs later in the background
    /// - miss: `fetch` runs now (one caller per key, concurrent callers wait and reuse
    ///   the stored result) and its result is cached
    /// - cache unavailable: `fetch` runs now, nothing is cached
    ///
    /// # Errors
    ///
    /// Returns the error of `fetch` when it had to run inline.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F, options: RevalidationOptions) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let counters = &self.engine.counters;
        if !self.is_available() {
            RuntimeCounters::bump(&counters.misses);
            return fetch().await;
        }

        if let Some(entry) = self.engine.read_entry(key).await {
            if !entry.is_stale() {
                RuntimeCounters::bump(&counters.hits);
                return Ok(entry.data);
            }
            RuntimeCounters::bump(&counters.stale_hits);
            self.revalidator.schedule(key, fetch_fn(fetch), options);
            return Ok(entry.data);
        }

        let key_owned = key.to_string();
        let lock_guard = self
            .in_flight_requests
            .entry(key_owned.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock_guard.lock().await;
        let _cleanup_guard = CleanupGuard {
            map: &*self.in_flight_requests,
            key: key_owned,
        };

        // another caller may have filled the key while we waited
        if let Some(entry) = self.engine.read_entry(key).await {
            RuntimeCounters::bump(&counters.hits);
            return Ok(entry.data);
        }

        RuntimeCounters::bump(&counters.misses);
        let fresh = fetch().await?;
        let ttl = options.ttl.unwrap_or_else(|| self.engine.default_ttl());
        if !self.engine.write_entry(key, &CacheEntry::new(fresh.clone(), &ttl)).await {
            debug!(key = %key, "Fetched value was not cached");
        }
        Ok(fresh)
    }

    /// Queue a background refresh of `key` unless one is already in flight
    pub fn revalidate_in_background<F, Fut>(&self, key: &str, fetch: F, options: RevalidationOptions) -> ScheduleOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.revalidator.schedule(key, fetch_fn(fetch), options)
    }

    /// Revalidation state of `key` (`None` = idle)
    #[must_use]
    pub fn revalidation_state(&self, key: &str) -> Option<RevalidationState> {
        self.revalidator.state(key)
    }

    /// Keys with a scheduled or running revalidation
    #[must_use]
    pub fn in_flight_revalidations(&self) -> usize {
        self.revalidator.in_flight_count()
    }

    // ===== Partial updates =====

    /// Replace the payload with `modify(payload)`; `None` leaves the entry alone
    ///
    /// TTL and timestamps are preserved. Read-modify-write, last write wins.
    pub async fn update_partial<F>(&self, key: &str, modify: F) -> bool
    where
        F: FnOnce(&Value) -> Option<Value>,
    {
        self.engine.rewrite_data(key, modify).await
    }

    /// Set one field, e.g. `update_field(key, "data.Status", json!("STARTED"))`
    pub async fn update_field(&self, key: &str, path: &str, value: Value) -> bool {
        self.update_fields(key, [(path, value)]).await
    }

    /// Set several fields at once; nothing is written unless every path applies
    pub async fn update_fields<I, S>(&self, key: &str, updates: I) -> bool
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let Some(updates) = parse_updates(updates) else {
            return false;
        };
        let Some((entry, ttl)) = self.engine.read_with_ttl(key).await else {
            debug!(key = %key, "Field update skipped, entry not cached");
            return false;
        };
        let Some(updated) = apply_paths(&entry, &updates) else {
            debug!(key = %key, "Field update did not apply");
            return false;
        };
        self.engine.write_with_ttl(key, &updated, ttl).await
    }

    /// Shallow-merge `patch` into the item with `id` inside the array at `array_path`
    pub async fn update_in_array(&self, key: &str, array_path: &str, id: &Value, patch: &Value) -> bool {
        let Ok(path) = FieldPath::parse(array_path) else {
            return false;
        };
        let Some((entry, ttl)) = self.engine.read_with_ttl(key).await else {
            return false;
        };
        let Some(doc) = serde_json::to_value(&entry).ok() else {
            return false;
        };
        let Some(array) = path.get(&doc).filter(|v| v.is_array()) else {
            debug!(key = %key, path = %array_path, "No array at path");
            return false;
        };
        let Some(new_array) = self.engine.reconciler.find_and_update(array, id, patch) else {
            return false;
        };
        let Some(updated) = apply_paths(&entry, &[(path, new_array)]) else {
            return false;
        };
        self.engine.write_with_ttl(key, &updated, ttl).await
    }

    async fn fan_out<F>(&self, pattern: &str, apply: F) -> usize
    where
        F: Fn(&Value) -> Option<Value>,
    {
        let keys = self.find_keys_by_pattern(pattern).await;
        let results = join_all(keys.iter().map(|key| self.engine.rewrite_data(key, &apply))).await;
        results.into_iter().filter(|changed| *changed).count()
    }

    /// Add `item` to the collection cached under every key matching `pattern`
    ///
    /// Returns the number of entries changed.
    pub async fn add_artifact_to_cache(&self, pattern: &str, item: &Value, options: &InsertOptions) -> usize {
        let reconciler = &self.engine.reconciler;
        self.fan_out(pattern, |data| reconciler.insert(data, item.clone(), options))
            .await
    }

    /// Remove the item with `id` from every collection matching `pattern`
    pub async fn remove_artifact_from_cache(&self, pattern: &str, id: &Value, options: &RemoveOptions) -> usize {
        let reconciler = &self.engine.reconciler;
        self.fan_out(pattern, |data| reconciler.remove(data, id, options)).await
    }

    /// Shallow-merge `patch` into the item with `id` under every key matching `pattern`
    pub async fn update_artifact_in_cache(&self, pattern: &str, id: &Value, patch: &Value) -> usize {
        let reconciler = &self.engine.reconciler;
        self.fan_out(pattern, |data| reconciler.find_and_update(data, id, patch))
            .await
    }

    // ===== Batches =====

    pub async fn batch_update(&self, items: Vec<BatchUpdate>) -> BatchResult {
        BatchExecutor::new(&self.engine).update(items).await
    }

    /// Delete all `keys` in one round trip, returning how many existed
    pub async fn batch_delete(&self, keys: &[String]) -> usize {
        BatchExecutor::new(&self.engine).delete(keys).await
    }

    pub async fn batch_update_ttl(&self, items: Vec<BatchTtlUpdate>) -> BatchResult {
        BatchExecutor::new(&self.engine).update_ttl(items).await
    }

    // ===== TTL =====

    /// Expire `key` after `ttl` from now
    pub async fn update_ttl(&self, key: &str, ttl: Duration) -> bool {
        if ttl.as_secs() == 0 {
            return false;
        }
        let Some(mut entry) = self.engine.read_entry(key).await else {
            return false;
        };
        entry.set_expiry(ttl, chrono::Utc::now());
        self.engine.write_with_ttl(key, &entry, ttl).await
    }

    /// Push the expiry of `key` back by `by`
    pub async fn extend_ttl(&self, key: &str, by: Duration) -> bool {
        let Some((mut entry, remaining)) = self.engine.read_with_ttl(key).await else {
            return false;
        };
        let ttl = remaining.saturating_add(by);
        entry.set_expiry(ttl, chrono::Utc::now());
        self.engine.write_with_ttl(key, &entry, ttl).await
    }

    // ===== Diagnostics =====

    /// Aggregate statistics for `pattern` (expensive, admin use only)
    pub async fn get_stats(&self, pattern: &str) -> CacheStats {
        StatsCollector::new(&self.engine).stats_for(pattern).await
    }

    pub async fn get_stats_by_pattern(&self, patterns: &[&str]) -> Vec<CacheStats> {
        let collector = StatsCollector::new(&self.engine);
        join_all(patterns.iter().map(|p| collector.stats_for(p))).await
    }

    /// Key count and size grouped by `METHOD:/EntitySet`
    pub async fn get_stats_by_endpoint(&self, pattern: &str) -> BTreeMap<String, EndpointStats> {
        StatsCollector::new(&self.engine).stats_by_endpoint(pattern).await
    }

    pub async fn get_key_info(&self, key: &str) -> KeyInfo {
        StatsCollector::new(&self.engine).key_info(key).await
    }

    pub async fn get_cache_health(&self) -> CacheHealth {
        let store = &self.engine.store;
        CacheHealth {
            enabled: store.is_enabled(),
            connected: store.is_available(),
            backend: store.backend_name(),
            codec: self.engine.codec.name(),
            healthy: store.health_check().await,
            runtime: self.runtime_stats(),
            checked_at: chrono::Utc::now(),
        }
    }

    /// Check one entry for corruption, deleting it when `repair` is set
    pub async fn validate_cache_entry(&self, key: &str, repair: bool) -> ValidationReport {
        validation::validate_entry(&self.engine, key, repair).await
    }

    pub async fn validate_cache_by_pattern(&self, pattern: &str, repair: bool) -> PatternValidationReport {
        validation::validate_pattern(&self.engine, pattern, repair).await
    }

    /// Prefetch entries with bounded concurrency and a per-entry timeout
    pub async fn warm_cache(&self, entries: Vec<WarmEntry>, options: WarmOptions) -> WarmReport {
        warmer::warm(&self.engine, entries, options).await
    }

    /// Snapshot of the runtime counters
    #[must_use]
    pub fn runtime_stats(&self) -> CacheManagerStats {
        self.engine
            .counters
            .snapshot(self.revalidator.in_flight_count(), self.revalidator.queued_count())
    }
}
