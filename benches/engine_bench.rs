//! Benchmarks for CaskKV engine operations

use caskkv::config::{Config, SyncStrategy};
use caskkv::engine::Engine;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::TempDir;

fn open_engine(max_file_size: u64) -> (TempDir, Engine) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .max_file_size(max_file_size)
        .sync_strategy(SyncStrategy::OnRotate)
        .merge_enabled(false)
        .build();
    let engine = Engine::open(config).unwrap();
    (temp, engine)
}

fn engine_benchmarks(c: &mut Criterion) {
    let value = vec![0xABu8; 100];

    c.bench_function("put_100b", |b| {
        let (_temp, engine) = open_engine(64 * 1024 * 1024);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            engine.put(format!("key{}", i).as_bytes(), black_box(&value)).unwrap();
        });
    });

    c.bench_function("get_100b", |b| {
        let (_temp, engine) = open_engine(64 * 1024 * 1024);
        for i in 0..10_000 {
            engine.put(format!("key{}", i).as_bytes(), &value).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            black_box(engine.get(format!("key{}", i).as_bytes()).unwrap());
        });
    });

    c.bench_function("get_across_rotated_files", |b| {
        let (_temp, engine) = open_engine(64 * 1024);
        for i in 0..10_000 {
            engine.put(format!("key{}", i).as_bytes(), &value).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            black_box(engine.get(format!("key{}", i).as_bytes()).unwrap());
        });
    });

    c.bench_function("mixed_80_read_20_write", |b| {
        let (_temp, engine) = open_engine(1024 * 1024);
        for i in 0..1_000 {
            engine.put(format!("key{}", i).as_bytes(), &value).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("key{}", i % 1_000);
            if i % 5 == 0 {
                engine.put(key.as_bytes(), &value).unwrap();
            } else {
                black_box(engine.get(key.as_bytes()).unwrap());
            }
        });
    });

    c.bench_function("merge_9k_records", |b| {
        b.iter_batched(
            || {
                let (temp, engine) = open_engine(64 * 1024);
                for round in 0..3 {
                    for i in 0..3_000 {
                        engine.put(format!("key{}", i).as_bytes(), &[round; 100]).unwrap();
                    }
                }
                (temp, engine)
            },
            |(_temp, engine)| black_box(engine.merge().unwrap()),
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, engine_benchmarks);
criterion_main!(benches);
