//! Basic Usage Example
//!
//! Demonstrates stale-while-revalidate reads, an in-place field update and a
//! differential refresh against the in-memory backend (no Redis needed).
//!
//! Run with: cargo run --example basic_usage

use odata_swr_cache::{CacheConfig, CacheManager, RevalidationOptions, TtlOptions};
use serde_json::{Value, json};
use std::time::Duration;

async fn fetch_orders(status: &'static str) -> anyhow::Result<Value> {
    println!("   📦 Fetching /Orders from upstream...");
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(json!({"d": {"results": [
        {"Id": "1", "Status": status},
        {"Id": "2", "Status": "NEW"}
    ], "__count": 2}}))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== OData SWR Cache: Basic Usage ===\n");

    // 1. Build over the in-memory store
    let config = CacheConfig {
        namespace: "demo".to_string(),
        revalidation_delay: Duration::from_millis(10),
        ..CacheConfig::default()
    };
    let cache = CacheManager::builder().with_config(config).with_memory().build()?;
    if cache.connect().await {
        println!("✅ Cache connected\n");
    }

    let key = cache.keys("erp.example.com").key("GET", "/Orders", Some("$top=10"));
    println!("Key: {key}\n");

    // 2. Miss: fetch inline and cache (stale after 1s, expires after 1h)
    let ttl = TtlOptions::with_revalidate_after(Duration::from_secs(3600), Duration::from_secs(1));
    let options = RevalidationOptions::default().with_ttl(ttl);
    let orders = cache.get_or_fetch(&key, || fetch_orders("NEW"), options.clone()).await?;
    println!("First read (miss): {orders}\n");

    // 3. Fresh hit: no fetch
    let orders = cache.get_or_fetch(&key, || fetch_orders("NEW"), options.clone()).await?;
    println!("Second read (hit): {orders}\n");

    // 4. Patch one field without touching the TTL
    if cache.update_field(&key, "data.d.results[1].Status", json!("SHIPPED")).await {
        let info = cache.get_key_info(&key).await;
        println!("After update_field, ttl = {}s\n", info.ttl_secs);
    }

    // 5. Stale hit: old value now, differential refresh in the background
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let stale = cache
        .get_or_fetch(&key, || fetch_orders("DONE"), RevalidationOptions::differential().with_ttl(ttl))
        .await?;
    println!("Stale read: {stale}");

    while cache.in_flight_revalidations() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if let Some(entry) = cache.get(&key).await {
        println!("After revalidation: {}\n", entry.data);
    }

    // 6. Statistics
    let stats = cache.runtime_stats();
    println!(
        "hits={} stale_hits={} misses={} revalidations_succeeded={}",
        stats.hits, stats.stale_hits, stats.misses, stats.revalidations_succeeded
    );

    cache.close().await;
    println!("\n✅ Cache closed");
    Ok(())
}
