use super::request::WorkRequest;
use crate::pipeline::{
    error::{Error, Result},
    pool::manager::WorkerPool,
};
use hdmint::Record;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Starts one round of `total` derivations and returns the stream of finished
/// chunks.
///
/// Chunks are handed to workers round-robin by a background task while the
/// caller consumes results, so derivation overlaps with consumption. Results
/// arrive in completion order. The stream ends once every dispatched chunk has
/// been delivered.
///
/// Cancelling `round_token` stops scheduling; chunks already handed to a worker
/// still complete and are delivered.
pub fn dispatch_round(
    total: usize,
    worker_pool: Arc<WorkerPool>,
    records_per_chunk: usize,
    result_buffer_size: usize,
    round_token: CancellationToken,
) -> ReceiverStream<Result<Vec<Record>>> {
    let (results_tx, results_rx) = mpsc::channel(result_buffer_size);

    tokio::spawn(async move {
        if let Err(e) = feed_chunks(
            total,
            &worker_pool,
            records_per_chunk,
            results_tx.clone(),
            &round_token,
        )
        .await
        {
            tracing::warn!("Round dispatch failed: {e}");
            // Best effort; the consumer may already be gone.
            let _ = results_tx.send(Err(e)).await;
        }
    });

    ReceiverStream::new(results_rx)
}

/// Splits a round into chunks and delegates them to workers.
///
/// Each worker has a request queue of depth 1, so this task waits whenever
/// every worker is busy. That wait, together with the bounded result channel,
/// is what holds derivation back while the run loop is flushing.
///
/// # Behavior
///
/// - Uses chunks of `records_per_chunk`, the last one possibly smaller.
/// - Stops quietly when `round_token` is cancelled or the pool shuts down.
/// - Returns an error if a worker channel is closed.
pub async fn feed_chunks(
    total: usize,
    worker_pool: &WorkerPool,
    records_per_chunk: usize,
    chunk_tx: mpsc::Sender<Result<Vec<Record>>>,
    round_token: &CancellationToken,
) -> Result<()> {
    let mut remaining = total;

    while remaining > 0 {
        let count = remaining.min(records_per_chunk);

        let sent = tokio::select! {
            biased;
            () = round_token.cancelled() => {
                tracing::debug!("Round cancelled with {remaining} derivations unscheduled");
                return Ok(());
            }
            sent = worker_pool.send_to_next_worker(WorkRequest::Generate {
                count,
                chunk_tx: chunk_tx.clone(),
            }) => sent,
        };

        match sent {
            Ok(()) => remaining -= count,
            Err(Error::ServiceShutdown) => {
                tracing::debug!("Worker pool shut down with {remaining} derivations unscheduled");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
