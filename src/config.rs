//! Cache Configuration
//!
//! Explicit configuration for a [`CacheManager`](crate::CacheManager). Every field has a
//! sensible default; [`CacheConfig::from_env`] overlays the usual environment variables.

use std::time::Duration;

/// Default Redis URL used when `REDIS_URL` is not set
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Configuration for the cache manager
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch. When `false` every store operation is a no-op.
    pub enabled: bool,
    /// Backend connection string (only used by the Redis backend)
    pub redis_url: String,
    /// First segment of every cache key
    pub namespace: String,
    /// TTL applied when the caller does not give one
    pub default_ttl: Duration,
    /// Freshness window applied when the caller does not give one
    pub default_revalidate_after: Duration,
    /// Pause the revalidation worker takes between two upstream fetches
    pub revalidation_delay: Duration,
    /// How long `close()` waits for in-flight revalidations
    pub shutdown_grace: Duration,
    /// `COUNT` hint for each SCAN iteration
    pub scan_count: usize,
    /// Concurrency bound for parallel cache warming
    pub warm_concurrency: usize,
    /// Field names checked (in order) for the named-collection envelope
    pub collection_fields: Vec<String>,
    /// Length of the hex suffix that marks derived metadata keys
    pub metadata_suffix_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            namespace: "odata".to_string(),
            default_ttl: Duration::from_secs(3600),
            default_revalidate_after: Duration::from_secs(300),
            revalidation_delay: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            scan_count: 100,
            warm_concurrency: 5,
            collection_fields: ["results", "items", "artifacts", "entities", "data"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            metadata_suffix_len: 64,
        }
    }
}

impl CacheConfig {
    /// Build a configuration from the environment, falling back to defaults
    ///
    /// Recognized variables: `REDIS_URL`, `CACHE_ENABLED`, `CACHE_NAMESPACE`,
    /// `CACHE_DEFAULT_TTL_SECS`, `CACHE_REVALIDATE_AFTER_SECS`,
    /// `CACHE_REVALIDATION_DELAY_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but with an injectable variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(flag) = lookup("CACHE_ENABLED") {
            config.enabled = !matches!(flag.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no");
        }
        if let Some(ns) = lookup("CACHE_NAMESPACE").filter(|s| !s.is_empty()) {
            config.namespace = ns;
        }
        if let Some(secs) = lookup("CACHE_DEFAULT_TTL_SECS").and_then(|s| s.parse().ok()) {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("CACHE_REVALIDATE_AFTER_SECS").and_then(|s| s.parse().ok()) {
            config.default_revalidate_after = Duration::from_secs(secs);
        }
        if let Some(ms) = lookup("CACHE_REVALIDATION_DELAY_MS").and_then(|s| s.parse().ok()) {
            config.revalidation_delay = Duration::from_millis(ms);
        }

        config
    }

    /// Config with the store switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6380"),
            ("CACHE_ENABLED", "false"),
            ("CACHE_NAMESPACE", "tenant"),
            ("CACHE_DEFAULT_TTL_SECS", "60"),
            ("CACHE_REVALIDATION_DELAY_MS", "5"),
        ]
        .into_iter()
        .collect();

        let config = CacheConfig::from_lookup(|k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert!(!config.enabled);
        assert_eq!(config.namespace, "tenant");
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.revalidation_delay, Duration::from_millis(5));
        // untouched
        assert_eq!(config.default_revalidate_after, Duration::from_secs(300));
    }

    #[test]
    fn test_unparseable_values_keep_defaults() {
        let config = CacheConfig::from_lookup(|k| (k == "CACHE_DEFAULT_TTL_SECS").then(|| "soon".to_string()));
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert!(config.enabled);
    }
}
