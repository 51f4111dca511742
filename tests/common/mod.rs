//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - In-memory cache setup (no Redis server needed)
//! - Unique, tenant-scoped test keys
//! - Envelope fixtures for every supported response shape
#![allow(dead_code)]

use odata_swr_cache::{CacheConfig, CacheManager, KeyBuilder, MemoryStore, TtlOptions};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Install a tracing subscriber honoring `RUST_LOG` (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config tuned for fast tests
pub fn test_config() -> CacheConfig {
    CacheConfig {
        namespace: "test".to_string(),
        revalidation_delay: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(2),
        ..CacheConfig::default()
    }
}

/// Connected manager over a fresh in-memory store
pub async fn setup_cache() -> (Arc<CacheManager>, Arc<MemoryStore>) {
    setup_cache_with(test_config()).await
}

pub async fn setup_cache_with(config: CacheConfig) -> (Arc<CacheManager>, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let cache = CacheManager::builder()
        .with_config(config)
        .with_backend(Arc::clone(&store) as Arc<dyn odata_swr_cache::CacheBackend>)
        .build()
        .unwrap_or_else(|e| panic!("Failed to build cache manager: {e}"));
    assert!(cache.connect().await, "memory store should connect");
    (Arc::new(cache), store)
}

/// Key builder for a random tenant, so tests never share keys
pub fn test_tenant(name: &str) -> KeyBuilder {
    KeyBuilder::new("test", &format!("{name}-{}.example.com", rand::random::<u32>()))
}

/// Create a test key with unique tenant
pub fn test_key(name: &str) -> String {
    test_tenant(name).key("GET", &format!("/{name}"), None)
}

/// Entry that stays fresh for an hour
pub fn fresh_ttl() -> TtlOptions {
    TtlOptions::with_revalidate_after(Duration::from_secs(3600), Duration::from_secs(600))
}

/// Entry that is stale as soon as it is written
pub fn stale_ttl() -> TtlOptions {
    TtlOptions::with_revalidate_after(Duration::from_secs(3600), Duration::ZERO)
}

/// Envelope fixtures
pub mod fixtures {
    use super::*;

    pub fn item(id: &str, status: &str) -> Value {
        json!({"Id": id, "Status": status, "Name": format!("item {id}")})
    }

    pub fn v2(items: &[Value]) -> Value {
        json!({"d": {"results": items, "__count": items.len()}})
    }

    pub fn v4(items: &[Value]) -> Value {
        json!({"@odata.context": "$metadata#Items", "value": items})
    }

    pub fn named(field: &str, items: &[Value]) -> Value {
        let mut envelope = serde_json::Map::new();
        envelope.insert(field.to_string(), Value::Array(items.to_vec()));
        envelope.insert("total".to_string(), json!(items.len()));
        Value::Object(envelope)
    }

    pub fn direct(items: &[Value]) -> Value {
        Value::Array(items.to_vec())
    }

    pub fn single(id: &str, status: &str) -> Value {
        json!({"d": item(id, status)})
    }
}

/// Poll until no revalidation is queued or running, or `limit` elapses
pub async fn wait_for_revalidations(cache: &CacheManager, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cache.in_flight_revalidations() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cache.in_flight_revalidations() == 0
}
