//! Performance benchmarks for the per-message hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ravebot_core::config::RateLimitConfig;
use ravebot_core::disconnect::classify;
use ravebot_core::*;
use std::sync::Arc;

fn benchmark_ttl_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("ttl_cache");

    for size in [100usize, 1_000, 10_000] {
        let cache: TtlCache<String, u64> =
            TtlCache::new(chrono::Duration::seconds(300), Arc::new(SystemClock));
        for i in 0..size {
            cache.insert(format!("{}@g.us", i), i as u64);
        }

        group.bench_with_input(BenchmarkId::new("get_hit", size), &size, |b, &size| {
            let key = format!("{}@g.us", size / 2);
            b.iter(|| cache.get(black_box(&key)))
        });

        group.bench_with_input(BenchmarkId::new("get_miss", size), &size, |b, _| {
            let key = "missing@g.us".to_string();
            b.iter(|| cache.get(black_box(&key)))
        });
    }

    group.finish();
}

fn benchmark_rate_limiter(c: &mut Criterion) {
    let limiter = RateLimiter::new(RateLimitConfig::default(), Arc::new(SystemClock));
    let users: Vec<String> = (0..1_000).map(|i| format!("51{}@s.whatsapp.net", i)).collect();

    c.bench_function("rate_limit_check_global", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % users.len();
            limiter.check_global(black_box(&users[i]))
        })
    });

    c.bench_function("rate_limit_check_command", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % users.len();
            limiter.check_command(black_box(&users[i]), black_box("ping"))
        })
    });
}

fn benchmark_silence_check(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let silences = SilenceService::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
    runtime.block_on(async {
        for i in 0..1_000 {
            silences
                .silence("1@g.us", &format!("51{}@s.whatsapp.net", i), "admin", 60)
                .await
                .unwrap();
        }
    });

    c.bench_function("silence_check_hit", |b| {
        b.iter(|| silences.is_silenced(black_box("1@g.us"), black_box("51500@s.whatsapp.net")))
    });
    c.bench_function("silence_check_miss", |b| {
        b.iter(|| silences.is_silenced(black_box("1@g.us"), black_box("52000@s.whatsapp.net")))
    });
}

fn benchmark_classification(c: &mut Criterion) {
    c.bench_function("classify_disconnect", |b| {
        b.iter(|| {
            for code in [401u16, 403, 408, 428, 440, 500, 515, 999] {
                black_box(classify(black_box(Some(code))));
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_ttl_cache,
    benchmark_rate_limiter,
    benchmark_silence_check,
    benchmark_classification
);
criterion_main!(benches);
