use anyhow::Context;
use clap::Parser;
use hdmint::Deriver;
use hdmint_pipeline::{
    pipeline::{
        config::{CliArgs, PipelineConfig},
        error::RunError,
        pool::manager::WorkerPool,
        run::RunLoop,
        telemetry::init_telemetry,
    },
    sink::{open_sink, write_recovery},
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = PipelineConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let sink = open_sink(&config)
        .with_context(|| format!("failed to open sink at {}", config.database_url))?;
    let pool = Arc::new(WorkerPool::spawn(
        config.num_workers,
        Deriver::new(),
        config.shutdown_timeout,
    ));

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let recovery_path = config.recovery_path.clone();
    let outcome = RunLoop::new(config, Arc::clone(&pool), sink).run(token).await;

    pool.shutdown().await;

    let result = match outcome {
        Ok(summary) => {
            tracing::info!(
                "Persisted {} records in {} batches over {:?}",
                summary.persisted,
                summary.flushes,
                summary.elapsed
            );
            Ok(())
        }
        Err(RunError::Store {
            source,
            unflushed,
            persisted,
        }) => match write_recovery(&recovery_path, &unflushed) {
            Ok(()) => Err(anyhow::Error::new(source).context(format!(
                "sink failed after {persisted} records; {} unflushed records saved to {}",
                unflushed.len(),
                recovery_path.display()
            ))),
            Err(dump) => Err(anyhow::Error::new(dump).context(format!(
                "failed to write {} unflushed records to {} after sink error: {source}",
                unflushed.len(),
                recovery_path.display()
            ))),
        },
        Err(e) => Err(e.into()),
    };

    providers.shutdown();
    result
}

fn log_startup_info(config: &PipelineConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting generation with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting generation into {:?} sink {} with {} workers",
            config.sink,
            config.database_url,
            config.num_workers
        );
    }
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, finishing in-flight work...");
    token.cancel();
}
