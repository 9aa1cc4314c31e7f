//! Durable destinations for generated records.
//!
//! A [`Sink`] stores a whole batch or nothing. Failures are classified so the
//! run loop can tell a busy or briefly unavailable backend (retry) from one
//! that will keep rejecting the batch (give up and hand the records back).

mod jsonl;
mod sqlite;

pub use jsonl::{JsonLinesSink, write_recovery};
pub use sqlite::SqliteSink;

use crate::pipeline::config::{PipelineConfig, SinkKind};
use core::fmt;
use hdmint::Record;
use std::sync::Arc;

/// A batch-oriented persistence backend.
///
/// `store` is called from Tokio's blocking pool and may block. It must be
/// atomic: on `Ok` every record is durable, on `Err` none of them are.
pub trait Sink: Send + Sync {
    /// Persists every record in `batch`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the batch could not be persisted; nothing
    /// from the batch was written.
    fn store(&self, batch: &[Record]) -> Result<(), StoreError>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn store(&self, batch: &[Record]) -> Result<(), StoreError> {
        (**self).store(batch)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The backend may accept the same batch if asked again later.
    Transient,
    /// Retrying the same batch will not help.
    Permanent,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

/// A failed [`Sink::store`] call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} store error: {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

/// Opens the sink selected by `config`.
///
/// # Errors
///
/// Returns a [`StoreError`] if the backend cannot be opened or initialized.
pub fn open_sink(config: &PipelineConfig) -> Result<Arc<dyn Sink>, StoreError> {
    Ok(match config.sink {
        SinkKind::Sqlite => Arc::new(SqliteSink::open(&config.database_url, &config.table_name)?),
        SinkKind::Jsonl => Arc::new(JsonLinesSink::open(&config.database_url)?),
    })
}
