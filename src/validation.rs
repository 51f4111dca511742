//! Corruption detection for cached entries
//!
//! The only place where decode failures are reported instead of being treated as
//! misses. Repair means deleting the key so the next read refetches it.

use chrono::Utc;
use serde::Serialize;

use crate::engine::CacheEngine;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::traits::{StoreOp, StoreReply, TTL_MISSING, TTL_NO_EXPIRY};

/// Findings for one key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub key: String,
    pub valid: bool,
    /// Human-readable problems, empty when valid
    pub issues: Vec<String>,
    /// The key was deleted because it was invalid
    pub repaired: bool,
}

/// Findings for every key matching a pattern
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternValidationReport {
    pub pattern: String,
    pub checked: usize,
    pub invalid: usize,
    pub repaired: usize,
    /// Reports of invalid keys only
    pub reports: Vec<ValidationReport>,
}

fn inspect(engine: &CacheEngine, stored: Option<Vec<u8>>, ttl: i64) -> Vec<String> {
    let Some(stored) = stored else {
        return vec!["key does not exist".to_string()];
    };

    let plain = match engine.codec.decode(&stored) {
        Ok(plain) => plain,
        Err(e) => return vec![CacheError::decode(format!("{} codec: {e}", engine.codec.name())).to_string()],
    };
    let entry = match CacheEntry::from_json_bytes(&plain) {
        Ok(entry) => entry,
        Err(e) => return vec![e.to_string()],
    };

    let mut issues = entry.invariant_issues();
    match ttl {
        TTL_NO_EXPIRY => issues.push("key has no expiry in the store".to_string()),
        TTL_MISSING => issues.push("key expired while being validated".to_string()),
        _ => {}
    }
    if entry.is_expired_at(Utc::now()) {
        issues.push(format!("expiresAt ({}) is in the past", entry.expires_at.to_rfc3339()));
    }
    issues
}

pub(crate) async fn validate_entry(engine: &CacheEngine, key: &str, repair: bool) -> ValidationReport {
    let mut replies = engine
        .store
        .pipeline(vec![
            StoreOp::Get { key: key.to_string() },
            StoreOp::Ttl { key: key.to_string() },
        ])
        .await
        .into_iter();
    let stored = replies.next().and_then(StoreReply::into_value);
    let ttl = replies.next().map_or(TTL_MISSING, |r| r.ttl_secs());
    let exists = stored.is_some();

    let issues = inspect(engine, stored, ttl);
    let valid = issues.is_empty();
    let repaired = !valid && exists && repair && engine.store.delete(key).await;
    if !valid {
        tracing::debug!(key = %key, issues = issues.len(), repaired, "Cache entry failed validation");
    }

    ValidationReport {
        key: key.to_string(),
        valid,
        issues,
        repaired,
    }
}

pub(crate) async fn validate_pattern(engine: &CacheEngine, pattern: &str, repair: bool) -> PatternValidationReport {
    let keys = engine.patterns.keys_for(&engine.store, pattern).await;
    let mut report = PatternValidationReport {
        pattern: pattern.to_string(),
        checked: keys.len(),
        ..PatternValidationReport::default()
    };

    for key in &keys {
        let entry_report = validate_entry(engine, key, repair).await;
        if entry_report.valid {
            continue;
        }
        report.invalid += 1;
        if entry_report.repaired {
            report.repaired += 1;
        }
        report.reports.push(entry_report);
    }
    report
}
