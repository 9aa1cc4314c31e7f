use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::StreamExt;
use hdmint::Deriver;
use hdmint_pipeline::{
    pipeline::{pool::manager::WorkerPool, streaming::coordinator::dispatch_round},
    sink::{Sink, SqliteSink},
};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

// Records per benchmark iteration.
const TOTAL_RECORDS: usize = 1024;
const RECORDS_PER_CHUNK: usize = 64;

/// End-to-end derivation throughput through the worker pool.
fn benchmark_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(TOTAL_RECORDS as u64));
    group.sample_size(10);
    let max_workers = num_cpus::get();

    for num_workers in [1, 2, 4, 8, 16].into_iter().filter(|&n| n <= max_workers) {
        let rt = Builder::new_multi_thread().enable_all().build().unwrap();
        let pool = rt.block_on(async {
            Arc::new(WorkerPool::spawn(
                num_workers,
                Deriver::new(),
                Duration::from_secs(3),
            ))
        });

        group.bench_function(
            format!("elems/{TOTAL_RECORDS}/workers/{num_workers}"),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let pool = Arc::clone(&pool);
                    async move {
                        let start = Instant::now();
                        for _ in 0..iters {
                            let mut results = dispatch_round(
                                TOTAL_RECORDS,
                                Arc::clone(&pool),
                                RECORDS_PER_CHUNK,
                                num_workers,
                                CancellationToken::new(),
                            );
                            while let Some(chunk) = results.next().await {
                                black_box(chunk.unwrap());
                            }
                        }
                        start.elapsed()
                    }
                });
            },
        );

        rt.block_on(pool.shutdown());
    }

    group.finish();
}

/// Cost of one SQLite transaction per batch, independent of derivation.
fn benchmark_sqlite_store(c: &mut Criterion) {
    let deriver = Deriver::new();
    let batch: Vec<_> = (0..TOTAL_RECORDS)
        .map(|_| deriver.derive().unwrap())
        .collect();
    let dir = tempfile::tempdir().unwrap();
    let sink = SqliteSink::open(dir.path().join("bench.sqlite3"), "seed_addresses").unwrap();

    let mut group = c.benchmark_group("sqlite");
    group.throughput(Throughput::Elements(TOTAL_RECORDS as u64));
    group.bench_function(format!("store/{TOTAL_RECORDS}"), |b| {
        b.iter(|| sink.store(black_box(&batch)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, benchmark_dispatch, benchmark_sqlite_store);
criterion_main!(benches);
