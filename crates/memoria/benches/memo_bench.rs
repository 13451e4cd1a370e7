//! Memoization benchmarks
//!
//! Benchmarks for cache hits and misses on both façades, key derivation
//! strategies, pointer expiration and bounded-store eviction.
//!
//! Run with: `cargo bench --bench memo_bench -p memoria`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memoria::{AsyncMemoized, CacheParameters, KeyStrategy, Memoized};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct Request {
    id: u64,
    region: &'static str,
}

// ============================================================================
// Blocking Façade Benchmarks
// ============================================================================

fn bench_sync_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_hit");
    group.throughput(Throughput::Elements(1));

    for size in [100u64, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::new("lru", size), &size, |b, &size| {
            let params = CacheParameters::builder()
                .maxsize(size as usize)
                .build()
                .expect("valid parameters");
            let cache = Memoized::new(params, |n: &u64| Ok::<_, std::io::Error>(n * 2))
                .expect("valid parameters");
            for i in 0..size {
                cache.call(&i).expect("computation succeeds");
            }

            let mut counter = 0u64;
            b.iter(|| {
                let _ = black_box(cache.call(&black_box(counter % size)));
                counter = counter.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_sync_miss_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_miss_eviction");
    group.throughput(Throughput::Elements(1));

    for size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("maxsize", size), &size, |b, &size| {
            let params = CacheParameters::builder().maxsize(size).build().expect("valid parameters");
            let cache = Memoized::new(params, |n: &u64| Ok::<_, std::io::Error>(n + 1))
                .expect("valid parameters");

            let mut counter = 0u64;
            b.iter(|| {
                let _ = black_box(cache.call(&black_box(counter)));
                counter = counter.wrapping_add(1);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Key Derivation Benchmarks
// ============================================================================

fn bench_key_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_strategy");
    group.throughput(Throughput::Elements(1));

    let strategies = [
        ("hashed", KeyStrategy::Hashed),
        ("single", KeyStrategy::Single),
        ("template", KeyStrategy::Template("{region}:{id}".to_string())),
    ];

    for (name, strategy) in strategies {
        group.bench_function(name, |b| {
            let params = CacheParameters::builder().key(strategy.clone()).build().expect("valid");
            let cache = Memoized::new(params, |request: &Request| {
                Ok::<_, std::io::Error>(request.id)
            })
            .expect("valid parameters");
            let request = Request { id: 42, region: "eu-west" };
            cache.call(&request).expect("computation succeeds");

            b.iter(|| black_box(cache.call(black_box(&request))));
        });
    }

    group.finish();
}

// ============================================================================
// Expiration Benchmarks
// ============================================================================

fn bench_expiration_kinds(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiration_hit");
    group.throughput(Throughput::Elements(1));

    let kinds = [
        ("never", None),
        ("interval", Some("10 minutes")),
        ("pointer", Some("$.token.expiration")),
    ];

    for (name, expiration) in kinds {
        group.bench_function(name, |b| {
            let mut builder = CacheParameters::builder();
            if let Some(expiration) = expiration {
                builder = builder.expiration(expiration);
            }
            let cache = Memoized::new(builder.build().expect("valid parameters"), |user: &str| {
                Ok::<_, std::io::Error>(json!({
                    "user": user,
                    "token": { "value": "abc", "expiration": "30 minutes" }
                }))
            })
            .expect("valid parameters");
            cache.call("alice").expect("computation succeeds");

            b.iter(|| black_box(cache.call(black_box("alice"))));
        });
    }

    group.finish();
}

// ============================================================================
// Async Façade Benchmarks
// ============================================================================

fn bench_async_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_call");
    group.throughput(Throughput::Elements(1));

    let rt = tokio::runtime::Runtime::new().expect("runtime");

    group.bench_function("hit", |b| {
        let cache = AsyncMemoized::new(CacheParameters::default(), |n: u64| async move {
            Ok::<_, std::io::Error>(Value::from(n))
        })
        .expect("valid parameters");
        rt.block_on(async {
            for i in 0..1000u64 {
                cache.call(i).await.expect("computation succeeds");
            }
        });

        let counter = Arc::new(AtomicU64::new(0));
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            let counter = Arc::clone(&counter);
            async move {
                let key = counter.fetch_add(1, Ordering::Relaxed) % 1000;
                let _ = black_box(cache.call(black_box(key)).await);
            }
        });
    });

    group.bench_function("miss", |b| {
        let params = CacheParameters::builder().maxsize(1000).build().expect("valid parameters");
        let cache = AsyncMemoized::new(params, |n: u64| async move {
            Ok::<_, std::io::Error>(Value::from(n))
        })
        .expect("valid parameters");

        let counter = Arc::new(AtomicU64::new(0));
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            let counter = Arc::clone(&counter);
            async move {
                let key = counter.fetch_add(1, Ordering::Relaxed);
                let _ = black_box(cache.call(black_box(key)).await);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sync_hit,
    bench_sync_miss_with_eviction,
    bench_key_strategies,
    bench_expiration_kinds,
    bench_async_call,
);
criterion_main!(benches);
