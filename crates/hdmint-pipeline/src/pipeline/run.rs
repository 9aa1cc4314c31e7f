//! The run loop: generate, aggregate, flush, repeat.
//!
//! [`RunLoop`] drives a two-state machine. While `Generating` it dispatches
//! rounds of derivations to the worker pool and feeds every finished record to
//! the [`BatchAggregator`]. The moment the aggregator reports a full batch it
//! switches to `Flushing`, hands the batch to the [`Sink`] and only returns to
//! `Generating` once the sink has accepted it. Workers keep deriving into the
//! bounded result channel during a flush and stall once it is full.
//!
//! No record is dropped on any path: a clean stop flushes the partial batch,
//! a store failure returns every record that was not persisted, and a
//! derivation failure persists the records already derived before reporting.

use super::{
    aggregator::{BatchAggregator, BatchStatus},
    config::PipelineConfig,
    error::{Error, RunError},
    pool::manager::WorkerPool,
    streaming::coordinator::dispatch_round,
    telemetry::{
        increment_flush_errors, increment_records_generated, increment_records_persisted,
        record_flush_duration,
    },
};
use crate::sink::{Sink, StoreError};
use core::time::Duration;
use futures::StreamExt;
use hdmint::Record;
use std::{sync::Arc, time::Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Generating,
    Flushing,
}

/// Totals for a run that stopped cleanly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub persisted: u64,
    pub flushes: u64,
    pub rounds: u64,
    pub elapsed: Duration,
}

/// Why a round stopped early.
enum Halt {
    Derivation(hdmint::Error),
    Internal(Error),
    Store(StoreError),
}

impl From<Error> for Halt {
    fn from(err: Error) -> Self {
        match err {
            Error::Derivation(e) => Self::Derivation(e),
            other => Self::Internal(other),
        }
    }
}

pub struct RunLoop {
    config: PipelineConfig,
    pool: Arc<WorkerPool>,
    sink: Arc<dyn Sink>,
    aggregator: BatchAggregator,
    state: RunState,
    /// Records received but not yet in the aggregator, only used while
    /// stopping after a failure.
    held: Vec<Record>,
    persisted: u64,
    flushes: u64,
    rounds: u64,
}

impl RunLoop {
    pub fn new(config: PipelineConfig, pool: Arc<WorkerPool>, sink: Arc<dyn Sink>) -> Self {
        let aggregator = BatchAggregator::new(config.batch_size);
        Self {
            config,
            pool,
            sink,
            aggregator,
            state: RunState::Generating,
            held: Vec::new(),
            persisted: 0,
            flushes: 0,
            rounds: 0,
        }
    }

    /// Runs until `token` is cancelled, the configured target is reached, or
    /// an unrecoverable error occurs.
    ///
    /// On a clean stop the partial batch is flushed before returning.
    ///
    /// # Errors
    ///
    /// - [`RunError::Store`] if the sink rejects a batch permanently or keeps
    ///   failing past the retry limit. It carries every unpersisted record.
    /// - [`RunError::Derivation`] if entropy or cryptography failed. Records
    ///   derived before the failure have been persisted.
    /// - [`RunError::Internal`] if the worker pool broke down.
    pub async fn run(mut self, token: CancellationToken) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        tracing::info!(
            batch_size = self.config.batch_size,
            round_size = self.config.round_size,
            workers = self.pool.num_workers(),
            target = ?self.config.target_records,
            "Run loop started"
        );

        while !token.is_cancelled() {
            let Some(total) = self.next_round_size() else {
                tracing::info!(
                    "Target of {} records reached",
                    self.persisted + self.aggregator.len() as u64
                );
                break;
            };

            let round_token = token.child_token();
            let mut results = dispatch_round(
                total,
                Arc::clone(&self.pool),
                self.config.records_per_chunk,
                self.config.result_buffer_size,
                round_token.clone(),
            );

            if let Err(halt) = self.consume_round(&mut results).await {
                round_token.cancel();
                return Err(self.stop_on_halt(halt, &mut results).await);
            }

            self.rounds += 1;
            tracing::debug!(round = self.rounds, records = total, "Round complete");
        }

        if token.is_cancelled() {
            tracing::info!(
                buffered = self.aggregator.len(),
                "Shutdown requested, flushing partial batch"
            );
        }
        if let Err(source) = self.flush().await {
            return Err(self.store_error(source));
        }

        let summary = RunSummary {
            persisted: self.persisted,
            flushes: self.flushes,
            rounds: self.rounds,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            persisted = summary.persisted,
            flushes = summary.flushes,
            rounds = summary.rounds,
            elapsed = ?summary.elapsed,
            "Run loop stopped"
        );
        Ok(summary)
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "Run state changed");
            self.state = next;
        }
    }

    /// Size of the next round, or `None` once the target has been produced.
    fn next_round_size(&self) -> Option<usize> {
        let Some(target) = self.config.target_records else {
            return Some(self.config.round_size);
        };
        let produced = self.persisted + self.aggregator.len() as u64;
        match target.saturating_sub(produced) {
            0 => None,
            remaining => Some(
                usize::try_from(remaining).map_or(self.config.round_size, |r| {
                    r.min(self.config.round_size)
                }),
            ),
        }
    }

    async fn consume_round(
        &mut self,
        results: &mut ReceiverStream<super::error::Result<Vec<Record>>>,
    ) -> Result<(), Halt> {
        while let Some(chunk) = results.next().await {
            let records = chunk?;
            increment_records_generated(records.len() as u64);

            let mut records = records.into_iter();
            while let Some(record) = records.next() {
                if let Err(source) = self.admit(record).await {
                    self.held.extend(records);
                    return Err(Halt::Store(source));
                }
            }
        }
        Ok(())
    }

    /// Buffers one record, flushing first if the batch is full and right after
    /// if this record filled it.
    async fn admit(&mut self, record: Record) -> Result<(), StoreError> {
        let mut pending = record;
        loop {
            match self.aggregator.append(pending) {
                Ok(BatchStatus::Accepting { .. }) => return Ok(()),
                Ok(BatchStatus::Full) => return self.flush().await,
                Err(refused) => {
                    if let Err(e) = self.flush().await {
                        self.held.push(refused);
                        return Err(e);
                    }
                    pending = refused;
                }
            }
        }
    }

    /// Flushes the whole batch, retrying transient failures with doubling
    /// backoff. On error the batch is back in the aggregator.
    async fn flush(&mut self) -> Result<(), StoreError> {
        if self.aggregator.is_empty() {
            return Ok(());
        }

        self.transition(RunState::Flushing);
        let mut backoff = self.config.retry_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let batch = self.aggregator.take_and_clear();
            let count = batch.len();
            let flush_started = Instant::now();

            match store_batch(Arc::clone(&self.sink), batch).await {
                Ok(()) => {
                    self.persisted += count as u64;
                    self.flushes += 1;
                    self.transition(RunState::Generating);
                    increment_records_persisted(count as u64);
                    record_flush_duration(flush_started.elapsed().as_secs_f64() * 1000.0);
                    tracing::info!(records = count, total = self.persisted, "Batch flushed");
                    return Ok(());
                }
                Err((batch, err)) => {
                    self.aggregator.restore(batch);
                    increment_flush_errors();

                    let retryable = err.is_retryable() && attempt <= self.config.flush_retries;
                    tracing::warn!(
                        reason = %err,
                        kind = %err.kind(),
                        retryable,
                        attempt,
                        records = count,
                        "Batch flush failed"
                    );
                    if !retryable {
                        return Err(err);
                    }

                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    /// Cancels the rest of the round, collects everything still in flight and
    /// builds the error to return.
    async fn stop_on_halt(
        &mut self,
        halt: Halt,
        results: &mut ReceiverStream<super::error::Result<Vec<Record>>>,
    ) -> RunError {
        while let Some(chunk) = results.next().await {
            match chunk {
                Ok(records) => {
                    increment_records_generated(records.len() as u64);
                    self.held.extend(records);
                }
                Err(e) => tracing::warn!("Discarding failed chunk while stopping: {e}"),
            }
        }

        match halt {
            Halt::Store(source) => self.store_error(source),
            Halt::Derivation(source) => {
                tracing::error!(
                    "Derivation failed, persisting {} held records: {source}",
                    self.aggregator.len() + self.held.len()
                );
                if let Err(store) = self.persist_held().await {
                    return self.store_error(store);
                }
                RunError::Derivation {
                    source,
                    persisted: self.persisted,
                }
            }
            Halt::Internal(source) => {
                tracing::error!("Pipeline failed: {source}");
                if let Err(store) = self.persist_held().await {
                    return self.store_error(store);
                }
                RunError::Internal {
                    source,
                    persisted: self.persisted,
                }
            }
        }
    }

    async fn persist_held(&mut self) -> Result<(), StoreError> {
        let mut held = core::mem::take(&mut self.held).into_iter();
        while let Some(record) = held.next() {
            if let Err(e) = self.admit(record).await {
                self.held.extend(held);
                return Err(e);
            }
        }
        self.flush().await
    }

    fn store_error(&mut self, source: StoreError) -> RunError {
        let mut unflushed = self.aggregator.take_and_clear();
        unflushed.append(&mut self.held);
        tracing::error!(
            unflushed = unflushed.len(),
            persisted = self.persisted,
            "Giving up on sink: {source}"
        );
        RunError::Store {
            source,
            unflushed,
            persisted: self.persisted,
        }
    }
}

/// Runs `sink.store` on the blocking pool. On failure the batch is handed
/// back with the error.
async fn store_batch(
    sink: Arc<dyn Sink>,
    batch: Vec<Record>,
) -> Result<(), (Vec<Record>, StoreError)> {
    let batch = Arc::new(batch);
    let shared = Arc::clone(&batch);
    let outcome = tokio::task::spawn_blocking(move || sink.store(&shared))
        .await
        .unwrap_or_else(|e| Err(StoreError::permanent(format!("store task failed: {e}"))));

    outcome.map_err(|err| {
        let batch = Arc::try_unwrap(batch).unwrap_or_else(|shared| shared.as_ref().clone());
        (batch, err)
    })
}
