//! Asynchronous worker pool for chunked record derivation.
//!
//! This module defines the [`WorkerPool`] struct, which manages a fixed set of
//! asynchronous workers responsible for processing [`WorkRequest`]s. It
//! distributes work using round-robin scheduling and supports coordinated
//! shutdown via a [`CancellationToken`].
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`] and executes tasks
//! independently. Workers share no mutable state, so no locking is involved.

use super::worker::worker_loop;
use crate::pipeline::{
    error::{Error, Result},
    streaming::request::WorkRequest,
};
use core::time::Duration;
use hdmint::{Deriver, EntropySource};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// A cooperative pool of asynchronous workers that process [`WorkRequest`]s.
///
/// Workers receive requests over bounded MPSC channels. Work is distributed in
/// round-robin fashion and the pool supports graceful, cancellable shutdown.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `num_workers` worker tasks sharing `deriver`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<E>(num_workers: usize, deriver: Deriver<E>, shutdown_timeout: Duration) -> Self
    where
        E: EntropySource + Send + Sync + 'static,
    {
        let deriver = Arc::new(deriver);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            // One in-flight request per worker. The dispatcher blocks once every
            // worker holds a request, which is the pool's back-pressure.
            let (tx, rx) = mpsc::channel(1);
            workers.push(tx);
            tokio::spawn(worker_loop(worker_id, rx, Arc::clone(&deriver)));
        }

        Self::new(workers, CancellationToken::new(), shutdown_timeout)
    }

    /// Constructs a new [`WorkerPool`] from initialized worker channels and a
    /// cancellation token.
    pub const fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
            shutdown_timeout,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Returns the index of the next worker to receive work (round-robin).
    ///
    /// Uses a relaxed atomic increment to minimize contention.
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends a [`WorkRequest`] to the next worker in the pool, waiting while
    /// that worker is busy.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down (`shutdown_token` was cancelled).
    /// - The worker's channel is closed.
    pub async fn send_to_next_worker(&self, request: WorkRequest) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let worker = &self.workers[worker_idx];

        match worker.send(request).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            }),
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Cancels the [`CancellationToken`] to refuse new work.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker. Workers finish the
    ///   chunk they hold before acknowledging.
    /// - Waits up to `shutdown_timeout` per worker for acknowledgements.
    pub async fn shutdown(&self) {
        tracing::info!("Refusing new work");
        self.shutdown_token.cancel();

        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.workers.len());

        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                tracing::error!("Failed to send shutdown to worker {i}: {e}");
            } else {
                shutdown_handles.push((i, rx));
            }
        }

        tracing::debug!(
            "Waiting for up to {:?} per worker for shutdown acknowledgements",
            self.shutdown_timeout
        );

        let shutdown_timeout = self.shutdown_timeout;
        let timeout_futures = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(shutdown_timeout, rx).await {
                Ok(Ok(())) => tracing::trace!("Worker {i} shutdown acknowledged"),
                Ok(Err(e)) => tracing::error!("Worker {i} returned error: {e}"),
                Err(_) => tracing::warn!("Worker {i} shutdown timed out"),
            }
        });

        futures::future::join_all(timeout_futures).await;

        tracing::info!("Worker pool shutdown complete");
    }
}
