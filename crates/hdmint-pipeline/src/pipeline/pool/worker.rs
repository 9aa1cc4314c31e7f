use crate::pipeline::streaming::{processor::handle_generate_request, request::WorkRequest};
use hdmint::{Deriver, EntropySource};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Workers share one stateless [`Deriver`]; each handles a single chunk at a
/// time and listens on its own channel until a shutdown signal is received or
/// the pool is dropped.
///
/// # Request Types
///
/// - [`WorkRequest::Generate`] derives a chunk via [`handle_generate_request`].
/// - [`WorkRequest::Shutdown`] signals the worker to stop and acknowledge
///   shutdown.
pub async fn worker_loop<E>(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    deriver: Arc<Deriver<E>>,
) where
    E: EntropySource + Send + Sync + 'static,
{
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Generate { count, chunk_tx } => {
                handle_generate_request(worker_id, count, chunk_tx, &deriver).await;
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
