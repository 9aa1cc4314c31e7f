use crate::{
    pipeline::{
        config::{PipelineConfig, SinkKind},
        error::{Error, RunError},
        pool::manager::WorkerPool,
        run::RunLoop,
        streaming::{coordinator::dispatch_round, processor::derive_chunk, request::WorkRequest},
    },
    sink::{Sink, StoreError, write_recovery},
};
use core::time::Duration;
use futures::StreamExt;
use hdmint::{Deriver, EntropySource, Record};
use std::{
    collections::{HashSet, VecDeque},
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Remembers every accepted batch and fails according to a script.
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<Record>>>,
    failures: Mutex<VecDeque<StoreError>>,
    attempts: AtomicUsize,
    cancel_on_store: Option<CancellationToken>,
}

impl RecordingSink {
    fn failing_with(failures: impl IntoIterator<Item = StoreError>) -> Self {
        Self {
            failures: Mutex::new(failures.into_iter().collect()),
            ..Self::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    fn stored(&self) -> Vec<Record> {
        self.batches.lock().unwrap().concat()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Sink for RecordingSink {
    fn store(&self, batch: &[Record]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        if let Some(token) = &self.cancel_on_store {
            token.cancel();
        }
        Ok(())
    }
}

/// Succeeds for the first `limit` draws, then reports the OS generator as
/// unavailable.
struct ExhaustibleEntropy {
    draws: AtomicUsize,
    limit: usize,
}

impl EntropySource for ExhaustibleEntropy {
    fn fill(&self, dest: &mut [u8]) -> hdmint::Result<()> {
        let draw = self.draws.fetch_add(1, Ordering::SeqCst);
        if draw >= self.limit {
            return Err(hdmint::Error::CryptoUnavailable {
                reason: "entropy exhausted".into(),
            });
        }
        // Distinct but deterministic per draw.
        dest.fill(0);
        dest[..8].copy_from_slice(&(draw as u64).to_be_bytes());
        Ok(())
    }
}

fn config(batch_size: usize, round_size: usize, target_records: Option<u64>) -> PipelineConfig {
    PipelineConfig {
        sink: SinkKind::Sqlite,
        database_url: String::from(":memory:"),
        table_name: String::from("seed_addresses"),
        batch_size,
        round_size,
        records_per_chunk: 2,
        num_workers: 2,
        result_buffer_size: 2,
        flush_retries: 2,
        retry_backoff: Duration::from_millis(1),
        target_records,
        recovery_path: PathBuf::from("unflushed.jsonl"),
        shutdown_timeout: Duration::from_secs(1),
    }
}

fn spawn_pool(num_workers: usize) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::spawn(
        num_workers,
        Deriver::new(),
        Duration::from_secs(1),
    ))
}

fn assert_distinct(records: &[Record]) {
    let unique: HashSet<_> = records.iter().map(Record::address).collect();
    assert_eq!(unique.len(), records.len());
}

#[tokio::test]
async fn threshold_three_flushes_once() {
    let sink = Arc::new(RecordingSink::default());
    let run = RunLoop::new(config(3, 3, Some(3)), spawn_pool(2), sink.clone());

    let summary = run.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.persisted, 3);
    assert_eq!(summary.flushes, 1);
    assert_eq!(summary.rounds, 1);
    assert_eq!(sink.batch_sizes(), vec![3]);
    assert_distinct(&sink.stored());
}

#[tokio::test]
async fn nothing_lost_across_rounds() {
    let sink = Arc::new(RecordingSink::default());
    let run = RunLoop::new(config(4, 5, Some(11)), spawn_pool(3), sink.clone());

    let summary = run.run(CancellationToken::new()).await.unwrap();

    // Rounds of 5, 5, 1; full batches of 4 plus the final partial one.
    assert_eq!(summary.rounds, 3);
    assert_eq!(sink.batch_sizes(), vec![4, 4, 3]);
    assert_eq!(summary.persisted, 11);
    assert_eq!(summary.flushes, 3);

    let stored = sink.stored();
    assert_eq!(stored.len() as u64, summary.persisted);
    assert_distinct(&stored);
}

#[tokio::test]
async fn transient_failure_keeps_batch_and_retries() {
    let sink = Arc::new(RecordingSink::failing_with([StoreError::transient(
        "database is locked",
    )]));
    let run = RunLoop::new(config(3, 3, Some(3)), spawn_pool(2), sink.clone());

    let summary = run.run(CancellationToken::new()).await.unwrap();

    assert_eq!(sink.attempts(), 2);
    assert_eq!(sink.batch_sizes(), vec![3]);
    assert_eq!(summary.persisted, 3);
    assert_eq!(summary.flushes, 1);
}

#[tokio::test]
async fn retries_are_bounded() {
    let sink = Arc::new(RecordingSink::failing_with(
        (0..10).map(|_| StoreError::transient("disk busy")),
    ));
    let run = RunLoop::new(config(3, 3, Some(3)), spawn_pool(2), sink.clone());

    let err = run.run(CancellationToken::new()).await.unwrap_err();

    // One attempt plus `flush_retries` retries.
    assert_eq!(sink.attempts(), 3);
    match err {
        RunError::Store {
            source,
            unflushed,
            persisted,
        } => {
            assert!(source.is_retryable());
            assert_eq!(unflushed.len(), 3);
            assert_eq!(persisted, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn permanent_failure_returns_unflushed_records() {
    let sink = Arc::new(RecordingSink::failing_with([StoreError::permanent(
        "no such table",
    )]));
    let run = RunLoop::new(config(3, 5, Some(5)), spawn_pool(2), sink.clone());

    let err = run.run(CancellationToken::new()).await.unwrap_err();

    assert_eq!(sink.attempts(), 1);
    assert!(sink.stored().is_empty());
    match err {
        RunError::Store {
            source,
            unflushed,
            persisted,
        } => {
            assert!(!source.is_retryable());
            assert_eq!(persisted, 0);
            // The failed batch plus whatever was already derived.
            assert!((3..=5).contains(&unflushed.len()), "{}", unflushed.len());
            assert_distinct(&unflushed);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn shutdown_flushes_partial_batch() {
    let token = CancellationToken::new();
    let sink = Arc::new(RecordingSink {
        cancel_on_store: Some(token.clone()),
        ..RecordingSink::default()
    });
    // Both chunks of the round are out before the first flush cancels.
    let run = RunLoop::new(config(3, 4, None), spawn_pool(2), sink.clone());

    let summary = run.run(token).await.unwrap();

    assert_eq!(sink.batch_sizes(), vec![3, 1]);
    assert_eq!(summary.persisted, 4);
    assert_eq!(summary.flushes, 2);
    assert_eq!(summary.rounds, 1);
}

#[tokio::test]
async fn cancelled_before_start_persists_nothing() {
    let token = CancellationToken::new();
    token.cancel();
    let sink = Arc::new(RecordingSink::default());
    let run = RunLoop::new(config(3, 4, None), spawn_pool(1), sink.clone());

    let summary = run.run(token).await.unwrap();

    assert_eq!(summary.persisted, 0);
    assert_eq!(summary.rounds, 0);
    assert_eq!(sink.attempts(), 0);
}

#[tokio::test]
async fn derivation_failure_persists_earlier_records() {
    // One worker keeps chunk order deterministic: draws 1-4 make two chunks,
    // draw 5 succeeds inside the third and draw 6 fails right after it.
    let deriver = Deriver::with_entropy(ExhaustibleEntropy {
        draws: AtomicUsize::new(0),
        limit: 5,
    });
    let pool = Arc::new(WorkerPool::spawn(1, deriver, Duration::from_secs(1)));
    let sink = Arc::new(RecordingSink::default());
    let run = RunLoop::new(config(100, 10, None), pool, sink.clone());

    let err = run.run(CancellationToken::new()).await.unwrap_err();

    match err {
        RunError::Derivation { source, persisted } => {
            assert!(matches!(source, hdmint::Error::CryptoUnavailable { .. }));
            assert_eq!(persisted, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.stored().len(), 5);
    assert_distinct(&sink.stored());
}

#[tokio::test]
async fn permanent_failure_dump_recovers_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let recovery_path = dir.path().join("unflushed.jsonl");
    let sink = Arc::new(RecordingSink::failing_with([StoreError::permanent(
        "disk image is malformed",
    )]));
    let run = RunLoop::new(config(3, 6, Some(6)), spawn_pool(2), sink.clone());

    let Err(RunError::Store { unflushed, .. }) = run.run(CancellationToken::new()).await else {
        panic!("expected a store failure");
    };
    assert!(unflushed.len() >= 3);
    write_recovery(&recovery_path, &unflushed).unwrap();

    let recovered: Vec<Record> = BufReader::new(File::open(&recovery_path).unwrap())
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
        .collect();
    assert_eq!(recovered, unflushed);
    assert!(sink.stored().is_empty());
}

#[test]
fn failing_chunk_keeps_completed_records() {
    let deriver = Deriver::with_entropy(ExhaustibleEntropy {
        draws: AtomicUsize::new(0),
        limit: 3,
    });

    let (records, outcome) = derive_chunk(&deriver, 5);

    assert_eq!(records.len(), 3);
    assert_distinct(&records);
    assert!(matches!(
        outcome,
        Err(Error::Derivation(hdmint::Error::CryptoUnavailable { .. }))
    ));
}

#[tokio::test]
async fn failing_chunk_sends_records_before_error() {
    let deriver = Deriver::with_entropy(ExhaustibleEntropy {
        draws: AtomicUsize::new(0),
        limit: 1,
    });
    let pool = Arc::new(WorkerPool::spawn(1, deriver, Duration::from_secs(1)));
    let (chunk_tx, mut chunk_rx) = mpsc::channel(2);

    pool.send_to_next_worker(WorkRequest::Generate { count: 2, chunk_tx })
        .await
        .unwrap();

    assert_eq!(chunk_rx.recv().await.unwrap().unwrap().len(), 1);
    assert!(chunk_rx.recv().await.unwrap().is_err());
    pool.shutdown().await;
    assert!(chunk_rx.recv().await.is_none());
}

#[tokio::test]
async fn dispatch_delivers_every_chunk() {
    let pool = spawn_pool(3);
    let chunks: Vec<_> = dispatch_round(7, pool, 3, 2, CancellationToken::new())
        .collect()
        .await;

    let mut sizes: Vec<_> = chunks
        .into_iter()
        .map(|chunk| chunk.unwrap().len())
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 3, 3]);
}

#[tokio::test]
async fn cancelled_round_dispatches_nothing() {
    let token = CancellationToken::new();
    token.cancel();
    let chunks: Vec<_> = dispatch_round(10, spawn_pool(2), 2, 2, token).collect().await;
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn pool_refuses_work_after_shutdown() {
    let pool = spawn_pool(2);
    pool.shutdown().await;

    let (chunk_tx, _chunk_rx) = mpsc::channel(1);
    let err = pool
        .send_to_next_worker(WorkRequest::Generate { count: 1, chunk_tx })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServiceShutdown));
}

#[tokio::test]
async fn workers_skip_chunks_nobody_waits_for() {
    let pool = spawn_pool(1);
    let (chunk_tx, chunk_rx) = mpsc::channel(1);
    drop(chunk_rx);

    pool.send_to_next_worker(WorkRequest::Generate {
        count: 1_000_000,
        chunk_tx,
    })
    .await
    .unwrap();

    // Returns promptly because the worker never started the chunk.
    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .unwrap();
}
