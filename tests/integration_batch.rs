//! Integration tests for pipelined batch operations

mod common;

use common::*;
use odata_swr_cache::{BatchResult, BatchTtlUpdate, BatchUpdate};
use serde_json::{Map, Value, json};
use std::time::Duration;

fn status_patch(status: &str) -> Map<String, Value> {
    let mut updates = Map::new();
    updates.insert("data.Status".to_string(), json!(status));
    updates
}

/// Test per-item accounting over existing and missing keys
#[tokio::test]
async fn test_batch_update_counts_each_item() {
    let (cache, store) = setup_cache().await;
    let tenant = test_tenant("batch_update");
    let existing: Vec<String> = (1..=3).map(|i| tenant.key("GET", &format!("/Items('{i}')"), None)).collect();
    let missing: Vec<String> = (8..=9).map(|i| tenant.key("GET", &format!("/Items('{i}')"), None)).collect();
    for key in &existing {
        cache.set(key, json!({"Status": "NEW"}), Some(fresh_ttl())).await;
    }

    let items = existing
        .iter()
        .chain(&missing)
        .map(|key| BatchUpdate::new(key.clone(), status_patch("DONE")))
        .collect();
    let before = store.command_count();
    let result = cache.batch_update(items).await;

    assert_eq!(result, BatchResult { success: 3, failed: 2 });
    assert_eq!(store.command_count() - before, 2, "one round trip per phase");
    for key in &existing {
        let entry = cache.get(key).await.unwrap_or_else(|| panic!("entry missing"));
        assert_eq!(entry.data["Status"], json!("DONE"));
        assert!(cache.get_key_info(key).await.ttl_secs > 3000, "ttl preserved");
    }
    for key in &missing {
        assert!(cache.get(key).await.is_none(), "batch update never creates entries");
    }
}

/// Test that an item whose paths do not apply fails alone
#[tokio::test]
async fn test_batch_update_bad_item_is_isolated() {
    let (cache, _store) = setup_cache().await;
    let good = test_key("good");
    let bad = test_key("bad");
    cache.set(&good, json!({"Status": "NEW"}), None).await;
    cache.set(&bad, json!(["not", "an", "object"]), None).await;

    let result = cache
        .batch_update(vec![
            BatchUpdate::new(good.clone(), status_patch("DONE")),
            BatchUpdate::new(bad.clone(), status_patch("DONE")),
        ])
        .await;

    assert_eq!(result, BatchResult { success: 1, failed: 1 });
    assert_eq!(cache.get(&bad).await.map(|e| e.data), Some(json!(["not", "an", "object"])));
}

/// Test that empty input makes no backend call
#[tokio::test]
async fn test_empty_batches_make_no_calls() {
    let (cache, store) = setup_cache().await;
    let before = store.command_count();

    assert_eq!(cache.batch_update(Vec::new()).await, BatchResult::default());
    assert_eq!(cache.batch_delete(&[]).await, 0);
    assert_eq!(cache.batch_update_ttl(Vec::new()).await, BatchResult::default());

    assert_eq!(store.command_count(), before);
}

/// Test batch delete counts only keys that existed
#[tokio::test]
async fn test_batch_delete() {
    let (cache, store) = setup_cache().await;
    let keys: Vec<String> = (0..4).map(|i| test_key(&format!("del{i}"))).collect();
    for key in keys.iter().take(3) {
        cache.set(key, json!(1), None).await;
    }

    let before = store.command_count();
    assert_eq!(cache.batch_delete(&keys).await, 3);
    assert_eq!(store.command_count() - before, 1);
    for key in &keys {
        assert!(cache.get(key).await.is_none());
    }
}

/// Test batch TTL change rewrites expiresAt and the store TTL
#[tokio::test]
async fn test_batch_update_ttl() {
    let (cache, _store) = setup_cache().await;
    let present = test_key("ttl_present");
    let absent = test_key("ttl_absent");
    cache.set(&present, json!(1), Some(fresh_ttl())).await;

    let result = cache
        .batch_update_ttl(vec![
            BatchTtlUpdate::new(present.clone(), Duration::from_secs(90)),
            BatchTtlUpdate::new(absent.clone(), Duration::from_secs(90)),
            BatchTtlUpdate::new(present.clone(), Duration::ZERO),
        ])
        .await;
    assert_eq!(result, BatchResult { success: 1, failed: 2 });

    let info = cache.get_key_info(&present).await;
    assert!((89..=90).contains(&info.ttl_secs), "ttl was {}", info.ttl_secs);
    let entry = cache.get(&present).await.unwrap_or_else(|| panic!("entry missing"));
    assert!(entry.revalidate_after <= entry.expires_at);
    assert!(entry.expires_at <= chrono::Utc::now() + chrono::TimeDelta::seconds(91));
}
