use crate::pipeline::error::{Error, Result};
use hdmint::{Deriver, EntropySource, Record};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handles a single chunk within a worker.
///
/// Derivation is CPU-bound (PBKDF2 dominates), so the chunk runs on Tokio's
/// blocking pool while the worker task awaits it. Finished records, and then
/// the error if one occurred, are sent on `chunk_tx`.
///
/// # Behavior
///
/// - Derives up to `count` records. If a derivation fails part-way, the
///   records completed before it are still delivered as `Ok`, followed by the
///   error.
/// - Skips the work entirely if the result channel is already closed.
/// - A panicking derivation task is reported as [`Error::Join`].
pub async fn handle_generate_request<E>(
    worker_id: usize,
    count: usize,
    chunk_tx: mpsc::Sender<Result<Vec<Record>>>,
    deriver: &Arc<Deriver<E>>,
) where
    E: EntropySource + Send + Sync + 'static,
{
    if chunk_tx.is_closed() {
        tracing::debug!("Worker {worker_id} skipping chunk, receiver closed");
        return;
    }

    let task_deriver = Arc::clone(deriver);
    let (records, outcome) =
        tokio::task::spawn_blocking(move || derive_chunk(&task_deriver, count))
            .await
            .unwrap_or_else(|e| (Vec::new(), Err(Error::Join(e.to_string()))));

    if let Err(ref e) = outcome {
        tracing::warn!(
            "Worker {worker_id} chunk failed after {} of {count} records: {e}",
            records.len()
        );
    }

    if !records.is_empty() {
        if let Err(e) = chunk_tx.send(Ok(records)).await {
            tracing::debug!("Worker {worker_id} failed to send chunk: {e}");
            return;
        }
    }

    if let Err(e) = outcome {
        if let Err(send) = chunk_tx.send(Err(e)).await {
            tracing::debug!("Worker {worker_id} failed to send chunk error: {send}");
        }
    }
}

/// Derives up to `count` records synchronously, stopping at the first error.
///
/// Returns every record completed before the error alongside the outcome.
pub fn derive_chunk<E: EntropySource>(
    deriver: &Deriver<E>,
    count: usize,
) -> (Vec<Record>, Result<()>) {
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        match deriver.derive() {
            Ok(record) => records.push(record),
            Err(e) => return (records, Err(e.into())),
        }
    }
    (records, Ok(()))
}
