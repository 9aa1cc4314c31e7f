use crate::pipeline::error::Result;
use hdmint::Record;
use tokio::sync::{mpsc, oneshot};

/// A message sent from the worker pool to an individual worker task.
///
/// [`WorkRequest`]s are sent over bounded asynchronous channels and are
/// consumed by the worker's main event loop.
#[derive(Debug)]
pub enum WorkRequest {
    /// Derive `count` records and send them back as one chunk.
    ///
    /// - `count`: Number of records to derive.
    /// - `chunk_tx`: Result channel shared by every chunk of the round. A
    ///   failing chunk sends its completed records first, then the error.
    Generate {
        count: usize,
        chunk_tx: mpsc::Sender<Result<Vec<Record>>>,
    },

    /// Request the worker to shut down gracefully.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   completed its shutdown routine.
    Shutdown { response: oneshot::Sender<()> },
}
