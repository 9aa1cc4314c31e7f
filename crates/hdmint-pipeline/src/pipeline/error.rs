//! Error types for the generation pipeline.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between the run loop
//!   and workers.
//! - `Derivation`: A worker failed to derive a record (via `hdmint`).
//! - `Join`: A blocking derivation task panicked or was aborted.
//! - `ServiceShutdown`: Work was requested after the pool began shutting down.
//!
//! [`RunError`] is what the run loop returns to its caller. It always carries
//! the number of records already persisted, and for store failures the records
//! that could not be written.

use crate::sink::StoreError;
use hdmint::Record;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the worker pool and dispatcher.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// Underlying derivation failed.
    #[error("Derivation error: {0}")]
    Derivation(#[from] hdmint::Error),

    /// A blocking derivation task did not complete.
    #[error("Worker task failed: {0}")]
    Join(String),

    /// The pool is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

/// Terminal failure of a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Entropy or a cryptographic primitive failed. Records derived before the
    /// failure were flushed first.
    #[error("derivation failed after {persisted} records were persisted: {source}")]
    Derivation {
        source: hdmint::Error,
        persisted: u64,
    },

    /// The sink rejected a batch permanently or retries were exhausted.
    #[error(
        "store failed after {persisted} records were persisted, {} records unflushed: {source}",
        .unflushed.len()
    )]
    Store {
        source: StoreError,
        unflushed: Vec<Record>,
        persisted: u64,
    },

    /// The dispatcher or a worker broke down.
    #[error("pipeline error after {persisted} records were persisted: {source}")]
    Internal { source: Error, persisted: u64 },
}

impl RunError {
    /// Records persisted before the run stopped.
    pub const fn persisted(&self) -> u64 {
        match self {
            Self::Derivation { persisted, .. }
            | Self::Store { persisted, .. }
            | Self::Internal { persisted, .. } => *persisted,
        }
    }
}
