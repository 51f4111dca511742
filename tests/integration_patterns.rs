//! Integration tests for pattern-based key discovery
//!
//! Tests that pattern operations stay exact per entity id and per tenant

mod common;

use common::*;
use odata_swr_cache::KeyBuilder;
use serde_json::json;

/// Test that deleting one entity's keys leaves its siblings alone
#[tokio::test]
async fn test_delete_by_pattern_is_id_exact() {
    let (cache, _store) = setup_cache().await;
    let tenant = test_tenant("delete_exact");
    let target = tenant.key("GET", "/Entities('1')", None);
    let target_expanded = tenant.key("GET", "/Entities('1')", Some("$expand=Children"));
    let sibling = tenant.key("GET", "/Entities('10')", None);
    for key in [&target, &target_expanded, &sibling] {
        cache.set(key, json!({"Id": key}), None).await;
    }

    let deleted = cache.delete_by_pattern(&tenant.entity_pattern("Entities", "1")).await;
    assert_eq!(deleted, 2);
    assert!(cache.get(&target).await.is_none());
    assert!(cache.get(&target_expanded).await.is_none());
    assert!(cache.get(&sibling).await.is_some(), "Entities('10') must survive");
}

/// Test that a tenant's pattern never reaches another tenant with a similar host
#[tokio::test]
async fn test_patterns_are_tenant_exact() {
    let (cache, _store) = setup_cache().await;
    let suffix = rand::random::<u32>();
    let host = KeyBuilder::new("test", &format!("host{suffix}"));
    let lookalike = KeyBuilder::new("test", &format!("host{suffix}x"));
    let mine = host.key("GET", "/Items('1')", None);
    let theirs = lookalike.key("GET", "/Items('1')", None);
    cache.set(&mine, json!(1), None).await;
    cache.set(&theirs, json!(2), None).await;

    // a bare prefix glob spans both tenants, a scoped one does not
    let careless = format!("test:host{suffix}*");
    assert_eq!(cache.find_keys_by_pattern(&careless).await.len(), 2);
    assert_eq!(cache.find_keys_by_pattern(&host.tenant_pattern()).await, vec![mine.clone()]);
    assert_eq!(
        cache
            .find_keys_by_pattern(&host.entity_pattern("Items", "1"))
            .await,
        vec![mine.clone()]
    );

    assert_eq!(cache.delete_by_pattern(&host.tenant_pattern()).await, 1);
    assert!(cache.get(&theirs).await.is_some());
}

/// Test that derived metadata keys are never returned
#[tokio::test]
async fn test_metadata_keys_are_filtered() {
    let (cache, _store) = setup_cache().await;
    let tenant = test_tenant("metadata");
    let primary = tenant.key("GET", "/Items", Some("$top=1"));
    let metadata = format!("{}:{}", tenant.key("GET", "/Items", None), "f".repeat(64));
    cache.set(&primary, json!([]), None).await;
    cache.set(&metadata, json!({"etag": "W/1"}), None).await;

    let keys = cache.find_keys_by_pattern(&tenant.tenant_pattern()).await;
    assert_eq!(keys, vec![primary]);
}

/// Test that ids containing glob characters are matched literally
#[tokio::test]
async fn test_ids_with_glob_characters() {
    let (cache, _store) = setup_cache().await;
    let tenant = test_tenant("glob_ids");
    let starred = tenant.key("GET", "/Files('a*b')", None);
    let plain = tenant.key("GET", "/Files('axxb')", None);
    cache.set(&starred, json!(1), None).await;
    cache.set(&plain, json!(2), None).await;

    let keys = cache.find_keys_by_pattern(&tenant.entity_pattern("Files", "a*b")).await;
    assert_eq!(keys, vec![starred]);
}

/// Test that a pattern without matches yields empty results everywhere
#[tokio::test]
async fn test_no_match_is_empty() {
    let (cache, _store) = setup_cache().await;
    let pattern = test_tenant("nothing").tenant_pattern();

    assert!(cache.find_keys_by_pattern(&pattern).await.is_empty());
    assert_eq!(cache.delete_by_pattern(&pattern).await, 0);
    assert_eq!(
        cache
            .update_artifact_in_cache(&pattern, &json!("1"), &json!({"a": 1}))
            .await,
        0
    );
    assert_eq!(cache.get_stats(&pattern).await.total_keys, 0);
}
