use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::path::PathBuf;

const DEFAULT_RECORDS_PER_CHUNK: usize = 256;

/// Runtime configuration for the `hdmint` binary.
///
/// These settings control the concurrency, batching and persistence behavior
/// of the generation pipeline. All values are parsed from CLI arguments or
/// environment variables (a `.env` file is loaded first), with defaults
/// suitable for an unattended bulk run.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hdmint",
    version,
    about = "Generate BIP39 mnemonics and their Ethereum addresses in bulk"
)]
pub struct CliArgs {
    /// Persistence backend for generated records.
    ///
    /// Environment variable: `SINK`
    #[arg(long, env = "SINK", value_enum, default_value_t = SinkKind::Sqlite)]
    pub sink: SinkKind,

    /// Where records are written: a SQLite database file for `sqlite`, or the
    /// output file for `jsonl`.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL", default_value_t = String::from("seed_db.sqlite3"))]
    pub database_url: String,

    /// Table that receives records when using the SQLite sink.
    ///
    /// Environment variable: `TABLE_NAME`
    #[arg(long, env = "TABLE_NAME", default_value_t = String::from("seed_addresses"))]
    pub table_name: String,

    /// Number of records buffered before a flush to the sink.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 500_000)]
    pub batch_size: usize,

    /// Number of derivations dispatched to the worker pool per round.
    ///
    /// Environment variable: `ROUND_SIZE`
    #[arg(long, env = "ROUND_SIZE", default_value_t = 500_000)]
    pub round_size: usize,

    /// Number of derivations handed to a worker in a single request.
    ///
    /// Larger chunks amortize channel overhead; smaller chunks let shutdown
    /// and failures take effect sooner. Defaults to 256, or `ROUND_SIZE` if
    /// that is smaller.
    ///
    /// Environment variable: `RECORDS_PER_CHUNK`
    #[arg(long, env = "RECORDS_PER_CHUNK")]
    pub records_per_chunk: Option<usize>,

    /// Number of worker tasks deriving records concurrently. Defaults to the
    /// number of logical CPUs.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS")]
    pub num_workers: Option<usize>,

    /// Capacity of the result channel between workers and the run loop, in
    /// chunks. Defaults to the number of workers.
    ///
    /// Lower values apply back-pressure sooner while a flush is in progress.
    ///
    /// Environment variable: `RESULT_BUFFER_SIZE`
    #[arg(long, env = "RESULT_BUFFER_SIZE")]
    pub result_buffer_size: Option<usize>,

    /// Retries for a flush that fails with a transient error.
    ///
    /// Environment variable: `FLUSH_RETRIES`
    #[arg(long, env = "FLUSH_RETRIES", default_value_t = 3)]
    pub flush_retries: u32,

    /// Delay before the first flush retry, doubled on each further attempt.
    ///
    /// Environment variable: `RETRY_BACKOFF_MS`
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Stop after this many records have been persisted. Runs until
    /// interrupted when unset.
    ///
    /// Environment variable: `TARGET_RECORDS`
    #[arg(long, env = "TARGET_RECORDS")]
    pub target_records: Option<u64>,

    /// File that receives unflushed records, as JSON lines, if the sink fails
    /// permanently.
    ///
    /// Environment variable: `RECOVERY_PATH`
    #[arg(long, env = "RECOVERY_PATH", default_value = "unflushed.jsonl")]
    pub recovery_path: PathBuf,

    /// Seconds to wait for each worker to acknowledge shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// One row per record in a SQLite table.
    Sqlite,
    /// One JSON object per line in an append-only file.
    Jsonl,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sink: SinkKind,
    pub database_url: String,
    pub table_name: String,
    pub batch_size: usize,
    pub round_size: usize,
    pub records_per_chunk: usize,
    pub num_workers: usize,
    pub result_buffer_size: usize,
    pub flush_retries: u32,
    pub retry_backoff: Duration,
    pub target_records: Option<u64>,
    pub recovery_path: PathBuf,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for PipelineConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let num_workers = args.num_workers.unwrap_or_else(num_cpus::get);
        let result_buffer_size = args.result_buffer_size.unwrap_or(num_workers);
        let records_per_chunk = args
            .records_per_chunk
            .unwrap_or(DEFAULT_RECORDS_PER_CHUNK.min(args.round_size));

        if num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if result_buffer_size == 0 {
            bail!("RESULT_BUFFER_SIZE must be greater than 0");
        }
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if args.round_size == 0 {
            bail!("ROUND_SIZE must be greater than 0");
        }
        if records_per_chunk == 0 {
            bail!("RECORDS_PER_CHUNK must be greater than 0");
        }
        if records_per_chunk > args.round_size {
            bail!(
                "RECORDS_PER_CHUNK ({records_per_chunk}) exceeds ROUND_SIZE ({})",
                args.round_size
            );
        }
        if args.target_records == Some(0) {
            bail!("TARGET_RECORDS must be greater than 0 when set");
        }

        Ok(Self {
            sink: args.sink,
            database_url: args.database_url,
            table_name: args.table_name,
            batch_size: args.batch_size,
            round_size: args.round_size,
            records_per_chunk,
            num_workers,
            result_buffer_size,
            flush_retries: args.flush_retries,
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
            target_records: args.target_records,
            recovery_path: args.recovery_path,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
