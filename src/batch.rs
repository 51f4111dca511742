//! Pipelined Bulk Operations
//!
//! Each operation costs one round trip per phase: updates read every entry and its
//! TTL in one pipeline, then write every successfully patched entry in a second.
//! Items are independent; one missing or unpatchable key never affects the others.
//! Nothing is atomic.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::engine::{CacheEngine, apply_paths, parse_updates};
use crate::entry::CacheEntry;
use crate::traits::{StoreOp, StoreReply, TTL_MISSING};

/// Per-item accounting of a bulk operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub success: usize,
    pub failed: usize,
}

/// Path updates for one key, applied like `update_fields`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdate {
    pub key: String,
    /// Path (relative to the entry, e.g. `data.Status`) to new value
    pub updates: Map<String, Value>,
}

impl BatchUpdate {
    #[must_use]
    pub fn new(key: impl Into<String>, updates: Map<String, Value>) -> Self {
        Self { key: key.into(), updates }
    }
}

/// New TTL for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTtlUpdate {
    pub key: String,
    pub ttl: Duration,
}

impl BatchTtlUpdate {
    #[must_use]
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self { key: key.into(), ttl }
    }
}

pub(crate) struct BatchExecutor<'a> {
    engine: &'a CacheEngine,
}

impl<'a> BatchExecutor<'a> {
    pub(crate) fn new(engine: &'a CacheEngine) -> Self {
        Self { engine }
    }

    /// Read `(entry, store ttl)` for every key in one pipeline
    async fn read_all(&self, keys: &[&str]) -> Vec<Option<(CacheEntry, i64)>> {
        let ops = keys
            .iter()
            .flat_map(|k| [StoreOp::Get { key: (*k).to_string() }, StoreOp::Ttl { key: (*k).to_string() }])
            .collect();
        let mut replies = self.engine.store.pipeline(ops).await.into_iter();

        keys.iter()
            .map(|key| {
                let stored = replies.next().and_then(StoreReply::into_value);
                let ttl = replies.next().map_or(TTL_MISSING, |r| r.ttl_secs());
                stored.and_then(|bytes| self.engine.decode_or_miss(key, &bytes)).map(|entry| (entry, ttl))
            })
            .collect()
    }

    /// Write every prepared entry in one pipeline; `None` slots count as failed
    async fn write_all(&self, prepared: Vec<Option<StoreOp>>) -> BatchResult {
        let failed_upfront = prepared.iter().filter(|op| op.is_none()).count();
        let ops: Vec<StoreOp> = prepared.into_iter().flatten().collect();
        let written = self
            .engine
            .store
            .pipeline(ops)
            .await
            .iter()
            .map(StoreReply::is_done)
            .fold(BatchResult::default(), |mut acc, done| {
                if done {
                    acc.success += 1;
                } else {
                    acc.failed += 1;
                }
                acc
            });
        BatchResult {
            success: written.success,
            failed: written.failed + failed_upfront,
        }
    }

    fn set_op(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Option<StoreOp> {
        match self.engine.encode(entry) {
            Ok(value) => Some(StoreOp::Set {
                key: key.to_string(),
                value,
                ttl,
            }),
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to encode entry in batch");
                None
            }
        }
    }

    pub(crate) async fn update(&self, items: Vec<BatchUpdate>) -> BatchResult {
        if items.is_empty() {
            return BatchResult::default();
        }
        let keys: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();
        let current = self.read_all(&keys).await;

        let prepared = items
            .iter()
            .zip(current)
            .map(|(item, current)| {
                let (entry, store_ttl) = current?;
                let updates = parse_updates(item.updates.iter().map(|(p, v)| (p.as_str(), v.clone())))?;
                let Some(updated) = apply_paths(&entry, &updates) else {
                    debug!(key = %item.key, "Batch update did not apply");
                    return None;
                };
                let ttl = self.engine.preserved_ttl(store_ttl, &entry);
                self.set_op(&item.key, &updated, ttl)
            })
            .collect();
        self.write_all(prepared).await
    }

    pub(crate) async fn delete(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let ops = keys.iter().map(|k| StoreOp::Delete { key: k.clone() }).collect();
        self.engine
            .store
            .pipeline(ops)
            .await
            .iter()
            .filter(|r| r.is_done())
            .count()
    }

    pub(crate) async fn update_ttl(&self, items: Vec<BatchTtlUpdate>) -> BatchResult {
        if items.is_empty() {
            return BatchResult::default();
        }
        let keys: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();
        let current = self.read_all(&keys).await;
        let now = Utc::now();

        let prepared = items
            .iter()
            .zip(current)
            .map(|(item, current)| {
                let (mut entry, _) = current?;
                if item.ttl.as_secs() == 0 {
                    return None;
                }
                entry.set_expiry(item.ttl, now);
                self.set_op(&item.key, &entry, item.ttl)
            })
            .collect();
        self.write_all(prepared).await
    }
}
