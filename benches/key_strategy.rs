//! Benchmarks for key construction and the memory layer hot path

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use media_cache::cache::{CacheLayer, CacheValue, MemoryLayer, MemoryLayerConfig};
use media_cache::{CacheKeyStrategy, NoopMetrics};
use std::collections::BTreeMap;

fn bench_generate_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_strategy");
    group.throughput(Throughput::Elements(1));

    group.bench_function("generate_key_plain", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let id = format!("image-{}.jpg", counter);
            CacheKeyStrategy::generate_key(black_box("images"), black_box(&id), None)
        });
    });

    let mut params = BTreeMap::new();
    params.insert("width".to_string(), "800".to_string());
    params.insert("height".to_string(), "600".to_string());
    params.insert("format".to_string(), "webp".to_string());
    params.insert("quality".to_string(), "85".to_string());

    group.bench_function("generate_key_with_params", |b| {
        b.iter(|| {
            CacheKeyStrategy::generate_key(
                black_box("transforms"),
                black_box("cat.jpg"),
                Some(black_box(&params)),
            )
        });
    });

    group.bench_function("generate_hash", |b| {
        b.iter(|| CacheKeyStrategy::generate_hash(black_box("format=webp&height=600&width=800")));
    });

    group.finish();
}

fn bench_memory_layer(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_layer");
    group.throughput(Throughput::Elements(1));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let layer = MemoryLayer::new(MemoryLayerConfig::default(), NoopMetrics::shared());
    let payload = CacheValue::from(vec![0u8; 16 * 1024]);

    rt.block_on(async {
        for i in 0..1000 {
            let key = format!("images:image-{:04}.jpg", i);
            let _ = layer.set(&key, payload.clone(), Some(3600)).await;
        }
    });

    group.bench_function("get_hit", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("images:image-{:04}.jpg", counter % 1000);
            rt.block_on(layer.get(black_box(&key)))
        });
    });

    group.bench_function("set_16k", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("images:image-{:04}.jpg", counter % 1000);
            rt.block_on(layer.set(black_box(&key), payload.clone(), Some(3600)))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_generate_key, bench_memory_layer);
criterion_main!(benches);
