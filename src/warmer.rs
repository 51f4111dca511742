//! Cache warming with bounded concurrency and per-entry timeouts

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::engine::CacheEngine;
use crate::entry::{CacheEntry, TtlOptions};
use crate::error::CacheError;
use crate::revalidation::{FetchFn, fetch_fn};

/// One key to prefetch
pub struct WarmEntry {
    pub key: String,
    fetch: FetchFn,
    /// TTL for the stored entry (configured defaults when `None`)
    pub ttl: Option<TtlOptions>,
}

impl WarmEntry {
    pub fn new<F, Fut>(key: impl Into<String>, fetch: F, ttl: Option<TtlOptions>) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: fetch_fn(fetch),
            ttl,
        }
    }
}

impl std::fmt::Debug for WarmEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmEntry")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmOptions {
    pub timeout_per_entry: Duration,
    /// Fetch several entries at once (bounded by `concurrency`)
    pub parallel: bool,
    /// Overrides the configured warm concurrency
    pub concurrency: Option<usize>,
}

impl Default for WarmOptions {
    fn default() -> Self {
        Self {
            timeout_per_entry: Duration::from_secs(30),
            parallel: true,
            concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub success: usize,
    pub failed: usize,
    pub duration: Duration,
    /// `(key, reason)` for each failed entry
    pub failures: Vec<(String, String)>,
}

async fn warm_one(engine: &CacheEngine, entry: WarmEntry, timeout: Duration) -> Result<(), (String, CacheError)> {
    let WarmEntry { key, fetch, ttl } = entry;
    let data = match tokio::time::timeout(timeout, fetch()).await {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => return Err((key, CacheError::UpstreamFetch(format!("{e:#}")))),
        Err(_) => return Err((key, CacheError::Timeout(timeout))),
    };

    let ttl = ttl.unwrap_or_else(|| engine.default_ttl());
    if engine.write_entry(&key, &CacheEntry::new(data, &ttl)).await {
        Ok(())
    } else {
        Err((key, CacheError::BackendUnavailable("entry was not stored".to_string())))
    }
}

pub(crate) async fn warm(engine: &CacheEngine, entries: Vec<WarmEntry>, options: WarmOptions) -> WarmReport {
    let started = Instant::now();
    let total = entries.len();
    let concurrency = if options.parallel {
        options.concurrency.unwrap_or(engine.config.warm_concurrency).max(1)
    } else {
        1
    };

    let results: Vec<_> = stream::iter(entries)
        .map(|entry| warm_one(engine, entry, options.timeout_per_entry))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut report = WarmReport::default();
    for result in results {
        match result {
            Ok(()) => report.success += 1,
            Err((key, e)) => {
                debug!(key = %key, error = %e, "Failed to warm cache entry");
                report.failed += 1;
                report.failures.push((key, e.to_string()));
            }
        }
    }
    report.duration = started.elapsed();
    info!(
        total,
        success = report.success,
        failed = report.failed,
        duration_ms = report.duration.as_millis(),
        "Cache warming finished"
    );
    report
}
