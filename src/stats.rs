//! Statistics and Diagnostics
//!
//! Two kinds of numbers live here:
//!
//! - [`RuntimeCounters`]: cheap atomic counters bumped on every operation and
//!   snapshotted by [`CacheManager::runtime_stats`](crate::CacheManager::runtime_stats)
//! - the stats collector: scans the store and asks it for TTLs and sizes. These are
//!   expensive (one `MEMORY USAGE` per key) and meant for admin endpoints only.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::CacheEngine;
use crate::traits::{StoreOp, StoreReply, TTL_MISSING};

/// Atomic operation counters
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) stale_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) revalidations_scheduled: AtomicU64,
    pub(crate) revalidations_deduplicated: AtomicU64,
    pub(crate) revalidations_succeeded: AtomicU64,
    pub(crate) revalidations_failed: AtomicU64,
}

impl RuntimeCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, in_flight: usize, queued: usize) -> CacheManagerStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheManagerStats {
            hits: load(&self.hits),
            stale_hits: load(&self.stale_hits),
            misses: load(&self.misses),
            revalidations_scheduled: load(&self.revalidations_scheduled),
            revalidations_deduplicated: load(&self.revalidations_deduplicated),
            revalidations_succeeded: load(&self.revalidations_succeeded),
            revalidations_failed: load(&self.revalidations_failed),
            in_flight_revalidations: in_flight,
            queued_revalidations: queued,
        }
    }
}

/// Snapshot of the runtime counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManagerStats {
    /// Fresh entries served
    pub hits: u64,
    /// Stale entries served (each one triggered a revalidation request)
    pub stale_hits: u64,
    pub misses: u64,
    pub revalidations_scheduled: u64,
    /// Revalidation requests dropped because the key was already in flight
    pub revalidations_deduplicated: u64,
    pub revalidations_succeeded: u64,
    /// Fetch errors, validator rejections and failed writes
    pub revalidations_failed: u64,
    pub in_flight_revalidations: usize,
    pub queued_revalidations: usize,
}

impl CacheManagerStats {
    /// Hit rate over fresh hits, stale hits and misses (0.0 without traffic)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 { 0.0 } else { served as f64 / total as f64 }
    }
}

/// Aggregate statistics for the keys matching one pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub pattern: String,
    pub total_keys: usize,
    pub total_size_bytes: u64,
    /// Mean remaining TTL over keys that have one
    pub average_ttl_secs: f64,
    pub oldest_entry_age_secs: Option<u64>,
    pub newest_entry_age_secs: Option<u64>,
    /// Entries past their freshness window
    pub stale_entries: usize,
    /// Keys whose value could not be decoded
    pub undecodable_entries: usize,
}

/// Key count and size for one endpoint (`METHOD:path` without key predicate)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub keys: usize,
    pub size_bytes: u64,
}

/// Everything known about one key
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub key: String,
    pub exists: bool,
    pub size_bytes: Option<u64>,
    /// Store TTL in seconds (-1 no expiry, -2 missing)
    pub ttl_secs: i64,
    pub age_secs: Option<u64>,
    pub cached_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revalidate_after: Option<DateTime<Utc>>,
    pub is_stale: Option<bool>,
    /// Value present but not decodable
    pub decodable: bool,
}

/// Liveness report for health endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub enabled: bool,
    pub connected: bool,
    pub backend: &'static str,
    pub codec: &'static str,
    /// Backend answered a health check
    pub healthy: bool,
    pub runtime: CacheManagerStats,
    pub checked_at: DateTime<Utc>,
}

/// Endpoint grouping of a key: `METHOD:/Path` with entity predicate and query hash dropped
///
/// `ns:host:GET:/Items('1')/Children:abcd` groups under `GET:/Items`.
#[must_use]
pub fn endpoint_of(key: &str) -> Option<String> {
    let mut segments = key.splitn(4, ':');
    let method = segments.nth(2)?;
    let path = segments.next()?;
    let (slash, name) = path.strip_prefix('/').map_or(("", path), |rest| ("/", rest));
    let end = name.find(['(', ':', '?', '/']).unwrap_or(name.len());
    Some(format!("{method}:{slash}{}", name.get(..end).unwrap_or(name)))
}

/// Expensive, store-scanning statistics
pub(crate) struct StatsCollector<'a> {
    engine: &'a CacheEngine,
}

impl<'a> StatsCollector<'a> {
    pub(crate) fn new(engine: &'a CacheEngine) -> Self {
        Self { engine }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) async fn stats_for(&self, pattern: &str) -> CacheStats {
        let keys = self.engine.patterns.keys_for(&self.engine.store, pattern).await;
        let mut stats = CacheStats {
            pattern: pattern.to_string(),
            total_keys: keys.len(),
            ..CacheStats::default()
        };
        if keys.is_empty() {
            return stats;
        }

        let ops = keys
            .iter()
            .flat_map(|k| [StoreOp::Get { key: k.clone() }, StoreOp::Ttl { key: k.clone() }])
            .collect();
        let replies = self.engine.store.pipeline(ops).await;
        let sizes = join_all(keys.iter().map(|k| self.engine.store.approximate_size(k))).await;
        stats.total_size_bytes = sizes.into_iter().flatten().sum();

        let now = Utc::now();
        let (mut ttl_sum, mut ttl_count) = (0_i64, 0_u32);
        let mut pairs = replies.into_iter();
        for key in &keys {
            let (Some(value), Some(ttl)) = (pairs.next(), pairs.next()) else {
                break;
            };
            let ttl = ttl.ttl_secs();
            if ttl > 0 {
                ttl_sum += ttl;
                ttl_count += 1;
            }
            let Some(stored) = StoreReply::into_value(value) else {
                continue;
            };
            match self.engine.decode(&stored) {
                Ok(entry) => {
                    let age = entry.age_at(now).as_secs();
                    stats.oldest_entry_age_secs = Some(stats.oldest_entry_age_secs.map_or(age, |a| a.max(age)));
                    stats.newest_entry_age_secs = Some(stats.newest_entry_age_secs.map_or(age, |a| a.min(age)));
                    if entry.is_stale_at(now) {
                        stats.stale_entries += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Undecodable entry while collecting stats");
                    stats.undecodable_entries += 1;
                }
            }
        }
        if ttl_count > 0 {
            stats.average_ttl_secs = ttl_sum as f64 / f64::from(ttl_count);
        }
        stats
    }

    pub(crate) async fn stats_by_endpoint(&self, pattern: &str) -> BTreeMap<String, EndpointStats> {
        let keys = self.engine.patterns.keys_for(&self.engine.store, pattern).await;
        let sizes = join_all(keys.iter().map(|k| self.engine.store.approximate_size(k))).await;

        let mut grouped: BTreeMap<String, EndpointStats> = BTreeMap::new();
        for (key, size) in keys.iter().zip(sizes) {
            let Some(endpoint) = endpoint_of(key) else {
                continue;
            };
            let slot = grouped.entry(endpoint).or_default();
            slot.keys += 1;
            slot.size_bytes += size.unwrap_or(0);
        }
        grouped
    }

    pub(crate) async fn key_info(&self, key: &str) -> KeyInfo {
        let store = &self.engine.store;
        let mut replies = store
            .pipeline(vec![
                StoreOp::Get { key: key.to_string() },
                StoreOp::Ttl { key: key.to_string() },
            ])
            .await
            .into_iter();
        let stored = replies.next().and_then(StoreReply::into_value);
        let ttl_secs = replies.next().map_or(TTL_MISSING, |r| r.ttl_secs());

        let Some(stored) = stored else {
            return KeyInfo {
                key: key.to_string(),
                ttl_secs: TTL_MISSING,
                ..KeyInfo::default()
            };
        };

        let mut info = KeyInfo {
            key: key.to_string(),
            exists: true,
            size_bytes: store.approximate_size(key).await,
            ttl_secs,
            ..KeyInfo::default()
        };
        if let Some(entry) = self.engine.decode_or_miss(key, &stored) {
            let now = Utc::now();
            info.decodable = true;
            info.age_secs = Some(entry.age_at(now).as_secs());
            info.cached_at = Some(entry.cached_at);
            info.expires_at = Some(entry.expires_at);
            info.revalidate_after = Some(entry.revalidate_after);
            info.is_stale = Some(entry.is_stale_at(now));
        }
        info
    }
}
