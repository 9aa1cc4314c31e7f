use super::{Sink, StoreError};
use hdmint::Record;
use rusqlite::{Connection, ErrorCode, params};
use std::{path::Path, sync::Mutex};

/// Stores records as rows of a SQLite table, one transaction per batch.
///
/// The table is created on open if missing:
///
/// ```sql
/// CREATE TABLE <table> (
///     id INTEGER PRIMARY KEY,
///     mnemonic TEXT NOT NULL,
///     address TEXT NOT NULL
/// )
/// ```
pub struct SqliteSink {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteSink {
    /// Opens (or creates) the database at `path` and ensures `table` exists.
    ///
    /// # Errors
    ///
    /// Returns a permanent [`StoreError`] for an invalid table name, and a
    /// classified error if SQLite cannot open or initialize the database.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let conn = Connection::open(path).map_err(classify)?;
        Self::init(conn, table)
    }

    /// An in-memory database, mainly for tests.
    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory().map_err(classify)?;
        Self::init(conn, table)
    }

    fn init(conn: Connection, table: &str) -> Result<Self, StoreError> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                mnemonic TEXT NOT NULL,
                address TEXT NOT NULL
            );
            "#
        ))
        .map_err(classify)?;

        tracing::debug!("SQLite sink ready, table {table}");

        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_owned(),
        })
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n.unsigned_abs())
        .map_err(classify)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::permanent("SQLite connection mutex poisoned"))
    }
}

impl Sink for SqliteSink {
    fn store(&self, batch: &[Record]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        // Dropping an uncommitted transaction rolls it back.
        let tx = conn.transaction().map_err(classify)?;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT INTO {} (mnemonic, address) VALUES (?1, ?2)",
                    self.table
                ))
                .map_err(classify)?;

            for record in batch {
                stmt.execute(params![record.mnemonic(), record.address().to_string()])
                    .map_err(classify)?;
            }
        }
        tx.commit().map_err(classify)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are
/// accepted.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::permanent(format!("invalid table name {table:?}")))
    }
}

/// Lock contention and I/O trouble may clear up; everything else (constraint
/// violations, schema errors, corruption, misuse) will not.
fn classify(err: rusqlite::Error) -> StoreError {
    let transient = matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::CannotOpen
                | ErrorCode::OutOfMemory
        )
    );
    if transient {
        StoreError::transient(err.to_string())
    } else {
        StoreError::permanent(err.to_string())
    }
}
