//! Shared cache core used by the manager and the revalidation worker
//!
//! Owns the fail-soft store, the payload codec and the reconciler. Every read
//! here turns decode failures into misses; only the validator looks at them.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, TtlOptions};
use crate::envelope::EnvelopeReconciler;
use crate::error::CacheError;
use crate::keys::PatternIndex;
use crate::path::FieldPath;
use crate::stats::RuntimeCounters;
use crate::store::Store;
use crate::traits::{PayloadCodec, StoreOp, StoreReply};

/// What a revalidation did with a fresh payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// Entry fully replaced by the fresh payload
    Replaced,
    /// Fresh collection merged into the cached one
    Merged { updated: usize, inserted: usize },
    /// Store write failed; the stale entry (if any) stays until its TTL
    WriteFailed,
}

pub(crate) struct CacheEngine {
    pub(crate) store: Store,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    pub(crate) reconciler: EnvelopeReconciler,
    pub(crate) patterns: PatternIndex,
    pub(crate) config: CacheConfig,
    pub(crate) counters: RuntimeCounters,
}

impl CacheEngine {
    pub(crate) fn new(store: Store, codec: Arc<dyn PayloadCodec>, config: CacheConfig) -> Self {
        Self {
            store,
            codec,
            reconciler: EnvelopeReconciler::new(config.collection_fields.clone()),
            patterns: PatternIndex::new(config.metadata_suffix_len),
            config,
            counters: RuntimeCounters::default(),
        }
    }

    /// TTL settings used when the caller gives none
    pub(crate) fn default_ttl(&self) -> TtlOptions {
        TtlOptions::with_revalidate_after(self.config.default_ttl, self.config.default_revalidate_after)
    }

    pub(crate) fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let plain = entry.to_json_bytes()?;
        self.codec.encode(&plain).map_err(CacheError::encode)
    }

    pub(crate) fn decode(&self, stored: &[u8]) -> Result<CacheEntry, CacheError> {
        let plain = self.codec.decode(stored).map_err(CacheError::decode)?;
        CacheEntry::from_json_bytes(&plain)
    }

    /// Decode or log and treat as a miss
    pub(crate) fn decode_or_miss(&self, key: &str, stored: &[u8]) -> Option<CacheEntry> {
        self.decode(stored)
            .inspect_err(|e| debug!(key = %key, error = %e, "Treating undecodable entry as a miss"))
            .ok()
    }

    pub(crate) async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let stored = self.store.get(key).await?;
        self.decode_or_miss(key, &stored)
    }

    /// Write with a store TTL derived from `expires_at - now`
    pub(crate) async fn write_entry(&self, key: &str, entry: &CacheEntry) -> bool {
        let Some(ttl) = entry.remaining_ttl_at(Utc::now()) else {
            debug!(key = %key, "Entry already expired, not writing");
            return false;
        };
        self.write_with_ttl(key, entry, ttl).await
    }

    pub(crate) async fn write_with_ttl(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> bool {
        match self.encode(entry) {
            Ok(bytes) => self.store.set(key, &bytes, ttl).await,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to encode cache entry");
                false
            }
        }
    }

    /// TTL to keep when rewriting an entry in place
    ///
    /// Prefers the store's own countdown, then the entry's `expires_at`, then
    /// the configured default.
    pub(crate) fn preserved_ttl(&self, store_ttl: i64, entry: &CacheEntry) -> Duration {
        u64::try_from(store_ttl)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .or_else(|| entry.remaining_ttl_at(Utc::now()))
            .unwrap_or(self.config.default_ttl)
    }

    /// Entry plus its remaining store TTL, fetched in one round trip
    pub(crate) async fn read_with_ttl(&self, key: &str) -> Option<(CacheEntry, Duration)> {
        let mut replies = self
            .store
            .pipeline(vec![
                StoreOp::Get { key: key.to_string() },
                StoreOp::Ttl { key: key.to_string() },
            ])
            .await
            .into_iter();
        let stored = replies.next().and_then(StoreReply::into_value)?;
        let store_ttl = replies.next().map_or(crate::traits::TTL_MISSING, |r| r.ttl_secs());
        let entry = self.decode_or_miss(key, &stored)?;
        let ttl = self.preserved_ttl(store_ttl, &entry);
        Some((entry, ttl))
    }

    /// Read-modify-write of an entry's payload, keeping its TTL and timestamps
    ///
    /// `modify` returning `None` aborts without writing. Last write wins.
    pub(crate) async fn rewrite_data<F>(&self, key: &str, modify: F) -> bool
    where
        F: FnOnce(&Value) -> Option<Value>,
    {
        let Some((mut entry, ttl)) = self.read_with_ttl(key).await else {
            debug!(key = %key, "Partial update skipped, entry not cached");
            return false;
        };
        let Some(data) = modify(&entry.data) else {
            debug!(key = %key, "Partial update did not apply");
            return false;
        };
        entry.data = data;
        self.write_with_ttl(key, &entry, ttl).await
    }

    /// Store the outcome of a successful revalidation fetch
    pub(crate) async fn apply_revalidation(
        &self,
        key: &str,
        fresh: Value,
        ttl: &TtlOptions,
        differential: bool,
    ) -> RevalidationOutcome {
        let now = Utc::now();

        if differential && let Some(mut existing) = self.read_entry(key).await {
            if let Some(merged) = self.reconciler.merge_collection(&existing.data, &fresh) {
                existing.data = merged.data;
                existing.refresh_metadata(ttl, now);
                return if self.write_entry(key, &existing).await {
                    RevalidationOutcome::Merged {
                        updated: merged.updated,
                        inserted: merged.inserted,
                    }
                } else {
                    RevalidationOutcome::WriteFailed
                };
            }
            debug!(key = %key, "Envelope shapes differ, replacing entry");
        }

        let entry = CacheEntry::new_at(fresh, ttl, now);
        if self.write_entry(key, &entry).await {
            RevalidationOutcome::Replaced
        } else {
            RevalidationOutcome::WriteFailed
        }
    }
}

/// Apply every `(path, value)` to an entry, all or nothing
///
/// Paths are relative to the entry document, so payload fields live under `data`
/// (e.g. `data.d.results[0].Status`). The result must still decode as an entry and keep
/// `cachedAt <= revalidateAfter <= expiresAt`.
pub(crate) fn apply_paths(entry: &CacheEntry, updates: &[(FieldPath, Value)]) -> Option<CacheEntry> {
    let mut doc = serde_json::to_value(entry).ok()?;
    for (path, value) in updates {
        if !path.set_in_place(&mut doc, value.clone()) {
            return None;
        }
    }
    serde_json::from_value::<CacheEntry>(doc)
        .ok()
        .filter(|updated| updated.invariant_issues().is_empty())
}

/// Parse every path, failing the whole set on the first bad one
pub(crate) fn parse_updates<I, S>(updates: I) -> Option<Vec<(FieldPath, Value)>>
where
    I: IntoIterator<Item = (S, Value)>,
    S: AsRef<str>,
{
    updates
        .into_iter()
        .map(|(path, value)| match FieldPath::parse(path.as_ref()) {
            Ok(parsed) => Some((parsed, value)),
            Err(e) => {
                debug!(error = %e, "Rejecting update with invalid path");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TtlOptions;
    use serde_json::json;

    #[test]
    fn test_apply_paths_is_all_or_nothing() {
        let entry = CacheEntry::new(json!({"Status": "NEW", "Owner": "ann"}), &TtlOptions::new(Duration::from_secs(60)));

        let updates = parse_updates([("data.Status", json!("STARTED")), ("data.Owner", json!("bob"))]).unwrap();
        let updated = apply_paths(&entry, &updates).unwrap();
        assert_eq!(updated.data, json!({"Status": "STARTED", "Owner": "bob"}));
        assert_eq!(updated.expires_at, entry.expires_at);

        let updates = parse_updates([("data.Status", json!("STARTED")), ("data.missing.x", json!(1))]).unwrap();
        assert!(apply_paths(&entry, &updates).is_none());
    }

    #[test]
    fn test_apply_paths_rejects_corrupting_metadata() {
        let entry = CacheEntry::new(json!({}), &TtlOptions::new(Duration::from_secs(60)));
        let updates = parse_updates([("expiresAt", json!("tomorrow"))]).unwrap();
        assert!(apply_paths(&entry, &updates).is_none());
    }

    #[test]
    fn test_apply_paths_keeps_timestamp_order() {
        let ttl = TtlOptions::with_revalidate_after(Duration::from_secs(60), Duration::from_secs(10));
        let entry = CacheEntry::new(json!({}), &ttl);
        let past_expiry = entry.expires_at.timestamp_millis() + 10_000_000;
        let updates = parse_updates([("revalidateAfter", json!(past_expiry))]).unwrap();
        assert!(apply_paths(&entry, &updates).is_none());

        let earlier = entry.expires_at.timestamp_millis() - 1_000;
        let updates = parse_updates([("expiresAt", json!(earlier))]).unwrap();
        assert!(apply_paths(&entry, &updates).is_some());
    }

    #[test]
    fn test_parse_updates_rejects_any_bad_path() {
        assert!(parse_updates([("data.ok", json!(1)), ("data..bad", json!(2))]).is_none());
    }
}
