use criterion::{black_box, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::{tempdir, TempDir};

use perfkeeper::{MetricStore, Sample, Storage, StoreConfig};

fn populated_store(samples: i64) -> (TempDir, MetricStore) {
    let dir = tempdir().expect("tempdir");
    let mut config = StoreConfig::new(dir.path());
    // Measure the scan, not the cache.
    config.summary_cache_capacity = 0;
    let store = MetricStore::open(config).expect("store");
    for i in 0..samples {
        let value = ((i * 7919) % 10_007) as f64 / 10.0;
        store
            .add_sample("bench", "latency", Sample::new(i * 1_000, value))
            .expect("append");
    }
    (dir, store)
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.sample_size(20);
    for &samples in &[1_000_i64, 50_000] {
        let (_dir, store) = populated_store(samples);
        group.bench_with_input(BenchmarkId::new("raw", samples), &store, |b, store| {
            b.iter(|| black_box(store.raw_values("bench", "latency").expect("raw")));
        });
        group.bench_with_input(BenchmarkId::new("summary", samples), &store, |b, store| {
            b.iter(|| black_box(store.summary("bench", "latency").expect("summary")));
        });
        group.bench_with_input(BenchmarkId::new("heat_map", samples), &store, |b, store| {
            b.iter(|| black_box(store.heat_map("bench", "latency").expect("heat map")));
        });
        group.bench_with_input(BenchmarkId::new("histogram", samples), &store, |b, store| {
            b.iter(|| black_box(store.histogram("bench", "latency").expect("histogram")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_read);
criterion_main!(benches);
