//! Integration tests for basic cache operations
//!
//! Tests entry lifecycle, the stale-while-revalidate read and fail-soft behavior

mod common;

use common::*;
use odata_swr_cache::{CacheConfig, CacheManager, MemoryStore, RevalidationOptions};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;

/// Test set and get round trip
#[tokio::test]
async fn test_set_and_get() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("set_get");
    let value = fixtures::single("1", "NEW");

    assert!(cache.set(&key, value.clone(), Some(fresh_ttl())).await);

    let entry = cache.get(&key).await.unwrap_or_else(|| panic!("entry should be cached"));
    assert_eq!(entry.data, value);
    assert!(entry.cached_at <= entry.revalidate_after);
    assert!(entry.revalidate_after <= entry.expires_at);
    assert!(!entry.is_stale());
}

/// Test delete
#[tokio::test]
async fn test_delete() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("delete");

    cache.set(&key, json!({"x": 1}), None).await;
    assert!(cache.delete(&key).await);
    assert!(cache.get(&key).await.is_none());
    assert!(!cache.delete(&key).await, "second delete finds nothing");
}

/// Test that a miss fetches once and subsequent reads hit
#[tokio::test]
async fn test_get_or_fetch_miss_then_hit() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("miss_then_hit");
    let fetches = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let counter = Arc::clone(&fetches);
        let value = cache
            .get_or_fetch(
                &key,
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(fixtures::v4(&[fixtures::item("1", "NEW")]))
                },
                RevalidationOptions::default(),
            )
            .await
            .unwrap_or_else(|e| panic!("fetch failed: {e}"));
        assert_eq!(value["value"][0]["Id"], json!("1"));
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let stats = cache.runtime_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
}

/// Test stampede protection with concurrent misses
#[tokio::test]
async fn test_concurrent_misses_fetch_once() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("stampede");
    let fetches = Arc::new(AtomicU32::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let counter = Arc::clone(&fetches);
        tasks.spawn(async move {
            cache
                .get_or_fetch(
                    &key,
                    move || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(fixtures::single("7", "NEW"))
                    },
                    RevalidationOptions::default(),
                )
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        let value = result
            .unwrap_or_else(|_| panic!("Task panicked"))
            .unwrap_or_else(|e| panic!("Fetch failed: {e}"));
        assert_eq!(value["d"]["Id"], json!("7"));
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1, "only one caller may hit upstream");
}

/// Test that a stale hit returns immediately and refreshes in the background
#[tokio::test]
async fn test_stale_hit_returns_old_value_then_refreshes() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("stale");

    cache.set(&key, fixtures::single("1", "OLD"), Some(stale_ttl())).await;

    let served = cache
        .get_or_fetch(
            &key,
            || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(fixtures::single("1", "NEW"))
            },
            RevalidationOptions::default().with_ttl(fresh_ttl()),
        )
        .await
        .unwrap_or_else(|e| panic!("stale read failed: {e}"));
    assert_eq!(served["d"]["Status"], json!("OLD"), "stale value is served without waiting");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let entry = cache.get(&key).await.unwrap_or_else(|| panic!("entry should still exist"));
    assert_eq!(entry.data["d"]["Status"], json!("NEW"));
    assert!(!entry.is_stale());
    assert_eq!(cache.runtime_stats().revalidations_succeeded, 1);
}

/// Test that a fetch error on miss is returned and nothing is cached
#[tokio::test]
async fn test_fetch_error_on_miss_is_propagated() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("fetch_error");

    let result = cache
        .get_or_fetch(&key, || async { Err(anyhow::anyhow!("upstream 503")) }, RevalidationOptions::default())
        .await;

    assert!(result.is_err());
    assert!(cache.get(&key).await.is_none());
}

/// Test that a disabled cache is a pure pass-through
#[tokio::test]
async fn test_disabled_cache_passes_through() {
    let cache = CacheManager::builder()
        .with_config(CacheConfig::disabled())
        .with_memory()
        .build()
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    assert!(!cache.connect().await);

    let key = test_key("disabled");
    assert!(!cache.set(&key, json!({"a": 1}), None).await);
    assert!(cache.get(&key).await.is_none());
    assert!(cache.find_keys_by_pattern("*").await.is_empty());

    let fetches = Arc::new(AtomicU32::new(0));
    for _ in 0..2 {
        let counter = Arc::clone(&fetches);
        let value = cache
            .get_or_fetch(
                &key,
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"a": 1}))
                },
                RevalidationOptions::default(),
            )
            .await
            .unwrap_or_else(|e| panic!("fetch failed: {e}"));
        assert_eq!(value, json!({"a": 1}));
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    cache.close().await;
}

/// Test that a backend outage degrades to misses instead of errors
#[tokio::test]
async fn test_backend_outage_is_soft() {
    let (cache, store) = setup_cache().await;
    let key = test_key("outage");
    cache.set(&key, json!({"a": 1}), None).await;

    store.set_available(false);
    assert!(cache.get(&key).await.is_none());
    assert!(!cache.set(&key, json!({"a": 2}), None).await);
    assert!(!cache.update_field(&key, "data.a", json!(3)).await);
    assert_eq!(cache.delete_by_pattern("test:*").await, 0);
    assert!(!cache.get_cache_health().await.healthy);

    store.set_available(true);
    let entry = cache.get(&key).await.unwrap_or_else(|| panic!("entry survives the outage"));
    assert_eq!(entry.data, json!({"a": 1}));
}

/// Test that an unreachable backend leaves the manager usable
#[tokio::test]
async fn test_connect_failure_runs_without_cache() {
    let store = Arc::new(MemoryStore::new());
    store.set_available(false);
    let cache = CacheManager::builder()
        .with_config(test_config())
        .with_backend(store.clone())
        .build()
        .unwrap_or_else(|e| panic!("build failed: {e}"));

    assert!(!cache.connect().await);
    assert!(!cache.is_available());
    let value = cache
        .get_or_fetch("k", || async { Ok(json!(1)) }, RevalidationOptions::default())
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert_eq!(value, json!(1));
}

/// Test TTL changes
#[tokio::test]
async fn test_update_and_extend_ttl() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("ttl");
    cache.set(&key, json!({"a": 1}), Some(fresh_ttl())).await;

    assert!(cache.update_ttl(&key, Duration::from_secs(120)).await);
    let info = cache.get_key_info(&key).await;
    assert!((119..=120).contains(&info.ttl_secs), "ttl was {}", info.ttl_secs);
    let entry = cache.get(&key).await.unwrap_or_else(|| panic!("entry missing"));
    assert!(entry.revalidate_after <= entry.expires_at, "revalidateAfter is clamped");

    assert!(cache.extend_ttl(&key, Duration::from_secs(60)).await);
    let info = cache.get_key_info(&key).await;
    assert!((178..=180).contains(&info.ttl_secs), "ttl was {}", info.ttl_secs);

    assert!(!cache.update_ttl(&key, Duration::ZERO).await);
    assert!(!cache.extend_ttl("missing", Duration::from_secs(5)).await);
}

/// Test key info for present and missing keys
#[tokio::test]
async fn test_key_info() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("info");
    cache.set(&key, fixtures::single("1", "NEW"), Some(fresh_ttl())).await;

    let info = cache.get_key_info(&key).await;
    assert!(info.exists);
    assert!(info.decodable);
    assert!(info.size_bytes.unwrap_or(0) > 0);
    assert_eq!(info.is_stale, Some(false));
    assert!(info.expires_at.is_some());
    assert!(info.revalidate_after.is_some());

    let missing = cache.get_key_info("nope").await;
    assert!(!missing.exists);
    assert_eq!(missing.ttl_secs, -2);
}

/// Test lifecycle: close disconnects, connect brings the manager back
#[tokio::test]
async fn test_close_and_reconnect() {
    let (cache, _store) = setup_cache().await;
    let key = test_key("reconnect");
    cache.set(&key, json!(1), None).await;

    cache.close().await;
    assert!(!cache.is_available());
    assert!(cache.get(&key).await.is_none());

    assert!(cache.connect().await);
    assert_eq!(cache.get(&key).await.map(|e| e.data), Some(json!(1)));
}
