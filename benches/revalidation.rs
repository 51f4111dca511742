//! Benchmarks for the stale-while-revalidate paths
//!
//! Runs against the in-memory store, so no Redis server is needed.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use odata_swr_cache::{CacheConfig, CacheManager, RevalidationOptions, TtlOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn setup_cache() -> (Arc<CacheManager>, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let cache = rt.block_on(async {
        let config = CacheConfig {
            namespace: "bench".to_string(),
            revalidation_delay: Duration::ZERO,
            ..CacheConfig::default()
        };
        let cache = CacheManager::builder()
            .with_config(config)
            .with_memory()
            .build()
            .unwrap_or_else(|_| panic!("Failed to create cache manager"));
        cache.connect().await;
        cache
    });
    (Arc::new(cache), rt)
}

/// Serving a stale entry: read, decode and schedule (or deduplicate) a refresh
fn bench_stale_hit(c: &mut Criterion) {
    let (cache, rt) = setup_cache();
    let key = "bench:host:GET:/Items('stale')";
    rt.block_on(cache.set(
        key,
        json!({"d": {"Id": "stale", "Status": "NEW"}}),
        Some(TtlOptions::with_revalidate_after(Duration::from_secs(3600), Duration::ZERO)),
    ));

    c.bench_function("get_or_fetch_stale_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let value = cache
                    .get_or_fetch(
                        key,
                        || async { Ok(json!({"d": {"Id": "stale", "Status": "NEW"}})) },
                        RevalidationOptions::default(),
                    )
                    .await
                    .unwrap_or_else(|_| panic!("Failed to serve stale entry"));
                black_box(value);
            });
        });
    });
}

/// 100 concurrent refresh requests for one key
fn bench_schedule_dedup(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    c.bench_function("revalidate_100_concurrent", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:host:GET:/Items('{}')", rand::random::<u32>());
                let mut handles = vec![];

                for _ in 0..100 {
                    let cache = cache.clone();
                    let key = key.clone();
                    handles.push(tokio::spawn(async move {
                        cache.revalidate_in_background(
                            &key,
                            || async { Ok(json!({"fresh": true})) },
                            RevalidationOptions::default(),
                        )
                    }));
                }

                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("Task failed")));
                }
            });
        });
    });
}

/// Miss coalescing: 100 callers, one fetch
fn bench_miss_coalescing(c: &mut Criterion) {
    let (cache, rt) = setup_cache();

    c.bench_function("get_or_fetch_100_concurrent_misses", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:host:GET:/Items('{}')", rand::random::<u32>());
                let mut handles = vec![];

                for _ in 0..100 {
                    let cache = cache.clone();
                    let key = key.clone();
                    handles.push(tokio::spawn(async move {
                        cache
                            .get_or_fetch(
                                &key,
                                || async {
                                    tokio::time::sleep(Duration::from_millis(1)).await;
                                    Ok(json!({"computed": true}))
                                },
                                RevalidationOptions::default(),
                            )
                            .await
                            .unwrap_or_else(|_| panic!("Failed to fetch"))
                    }));
                }

                for handle in handles {
                    black_box(handle.await.unwrap_or_else(|_| panic!("Task failed")));
                }
            });
        });
    });
}

criterion_group!(benches, bench_stale_hit, bench_schedule_dedup, bench_miss_coalescing);
criterion_main!(benches);
