//! Cache Entry - Stored Value With Freshness Metadata
//!
//! Every physical key holds one serialized [`CacheEntry`]: the upstream payload plus
//! three timestamps. Invariant: `cached_at <= revalidate_after <= expires_at`.
//! The store's own TTL is derived from `expires_at - now` at write time; the
//! freshness window (`revalidate_after`) only lives inside the value.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::CacheError;

/// Longest TTL representable without timestamp overflow (100 years)
const MAX_TTL_WEEKS: i64 = 52 * 100;

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::weeks(MAX_TTL_WEEKS))
}

/// TTL settings for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlOptions {
    /// Hard expiry; becomes the store TTL
    pub ttl: Duration,
    /// Freshness window; `None` means "fresh until expiry"
    pub revalidate_after: Option<Duration>,
}

impl TtlOptions {
    /// Entry that stays fresh for its whole lifetime
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            revalidate_after: None,
        }
    }

    /// Entry that turns stale after `revalidate_after` and expires after `ttl`
    #[must_use]
    pub fn with_revalidate_after(ttl: Duration, revalidate_after: Duration) -> Self {
        Self {
            ttl,
            revalidate_after: Some(revalidate_after),
        }
    }

    /// Freshness window clamped to the TTL
    #[must_use]
    pub fn effective_revalidate_after(&self) -> Duration {
        self.revalidate_after.map_or(self.ttl, |ra| ra.min(self.ttl))
    }
}

/// A cached payload with its freshness metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Raw upstream payload (envelope included)
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub revalidate_after: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry cached now
    #[must_use]
    pub fn new(data: Value, ttl: &TtlOptions) -> Self {
        Self::new_at(data, ttl, Utc::now())
    }

    /// Create an entry cached at `now`
    #[must_use]
    pub fn new_at(data: Value, ttl: &TtlOptions, now: DateTime<Utc>) -> Self {
        Self {
            data,
            cached_at: now,
            expires_at: now + to_delta(ttl.ttl),
            revalidate_after: now + to_delta(ttl.effective_revalidate_after()),
        }
    }

    /// Past the freshness window (but maybe not expired)
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.revalidate_after
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left until `expires_at`; `None` once expired
    #[must_use]
    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Time since the entry was cached (zero for clock skew)
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Restamp all three timestamps as if freshly cached at `now`
    pub fn refresh_metadata(&mut self, ttl: &TtlOptions, now: DateTime<Utc>) {
        self.cached_at = now;
        self.expires_at = now + to_delta(ttl.ttl);
        self.revalidate_after = now + to_delta(ttl.effective_revalidate_after());
    }

    /// Move `expires_at` to `now + ttl`, keeping `revalidate_after` inside the bounds
    pub fn set_expiry(&mut self, ttl: Duration, now: DateTime<Utc>) {
        self.expires_at = now + to_delta(ttl);
        if self.revalidate_after > self.expires_at {
            self.revalidate_after = self.expires_at;
        }
        if self.cached_at > self.revalidate_after {
            self.cached_at = self.revalidate_after;
        }
    }

    /// Human-readable violations of the timestamp invariant
    #[must_use]
    pub fn invariant_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.cached_at > self.revalidate_after {
            issues.push(format!(
                "cachedAt ({}) is after revalidateAfter ({})",
                self.cached_at.to_rfc3339(),
                self.revalidate_after.to_rfc3339()
            ));
        }
        if self.revalidate_after > self.expires_at {
            issues.push(format!(
                "revalidateAfter ({}) is after expiresAt ({})",
                self.revalidate_after.to_rfc3339(),
                self.expires_at.to_rfc3339()
            ));
        }
        issues
    }

    /// Serialize to JSON bytes (before payload encoding)
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`] if the payload cannot be serialized.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(CacheError::encode)
    }

    /// Deserialize from JSON bytes (after payload decoding)
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`] if the bytes are not a valid entry.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(CacheError::decode)
    }
}
