//! Flow table benchmarks.
//!
//! Measures classification, batch dispatch at different run lengths, and
//! reaping of idle flows.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use flowcore::clock::ManualClock;
use flowcore::flow::{FlowHashTable, FlowKey, FlowTableConfig, FlowTableManager, PacketBatch};

fn key(n: u32) -> FlowKey {
    let [a, b, c, d] = n.to_be_bytes();
    FlowKey::tcp_v4([10, a, b, c], 1024 + d as u16, [192, 168, 0, 1], 443)
}

fn table(capacity: usize) -> FlowTableManager {
    let config = FlowTableConfig::new(capacity).with_timeout(Duration::from_secs(10));
    FlowTableManager::initialize(config, Arc::new(ManualClock::new(0))).unwrap()
}

fn bench_hash_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_table");

    group.bench_function("insert_remove", |b| {
        let mut hash = FlowHashTable::new(4096);
        for i in 0..3072 {
            hash.insert(key(i)).unwrap();
        }
        let mut next = 3072;
        b.iter(|| {
            hash.insert(key(next)).unwrap();
            black_box(hash.remove(&key(next - 3072)));
            next += 1;
        })
    });

    group.bench_function("lookup_hit", |b| {
        let mut hash = FlowHashTable::new(4096);
        for i in 0..4096 {
            hash.insert(key(i)).unwrap();
        }
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % 4096;
            black_box(hash.lookup(&key(i)))
        })
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let table = table(65_536);
    for i in 0..32_768 {
        table.classify(key(i), 0).unwrap();
    }

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(1));

    group.bench_function("existing_flow", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % 32_768;
            black_box(table.classify(key(i), 0).unwrap())
        })
    });

    group.finish();
}

fn bench_process_batch(c: &mut Criterion) {
    let table = table(4096);
    let mut group = c.benchmark_group("process_batch");
    group.throughput(Throughput::Elements(64));

    // Run length = consecutive packets of the same flow
    for run in [1u32, 4, 16] {
        group.bench_function(format!("run_{}", run), |b| {
            b.iter_batched(
                || (0..64u32).map(|i| (key(i / run), i)).collect::<PacketBatch<_>>(),
                |batch| {
                    table.process_batch(batch, 0, &|p: &(FlowKey, u32)| Some(p.0), |_, packets| {
                        black_box(packets);
                    })
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_reaper(c: &mut Criterion) {
    let mut group = c.benchmark_group("reaper");

    group.bench_function("evict_1024", |b| {
        b.iter_batched(
            || {
                let table = table(1024);
                for i in 0..1024 {
                    table.classify(key(i), 0).unwrap();
                }
                table
            },
            |table| black_box(table.run_reaper(20_000).unwrap()),
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hash_table,
    bench_classify,
    bench_process_batch,
    bench_reaper,
);

criterion_main!(benches);
