//! # Telemetry Features
//!
//! Logging is always on: events are written to the console through
//! `tracing_subscriber::fmt`, filtered by `RUST_LOG` (default `info`).
//!
//! Metrics are optional and exported via OpenTelemetry.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics (counters and a histogram).
//! - `stdout`: Enables the stdout exporter for those metrics.
//!
//! ## Metrics
//!
//! - `records_generated`: records received from workers
//! - `records_persisted`: records committed by the sink
//! - `flush_errors`: failed flush attempts, retried or not
//! - `flush_duration`: wall time of each successful flush, in milliseconds
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features metrics,stdout
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops exporters. Errors are printed, not returned, since
    /// this runs during process exit.
    pub fn shutdown(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder("hdmint")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("hdmint")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "metrics")]
static RECORDS_GENERATED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RECORDS_PERSISTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FLUSH_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FLUSH_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = RECORDS_GENERATED.set(
        meter
            .u64_counter("records_generated")
            .with_description("Records derived by workers")
            .build(),
    );

    let _ = RECORDS_PERSISTED.set(
        meter
            .u64_counter("records_persisted")
            .with_description("Records committed to the sink")
            .build(),
    );

    let _ = FLUSH_ERRORS.set(
        meter
            .u64_counter("flush_errors")
            .with_description("Failed flush attempts")
            .build(),
    );

    let _ = FLUSH_DURATION_MS.set(
        meter
            .f64_histogram("flush_duration")
            .with_unit("ms")
            .with_description("Wall time of successful flushes")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_records_generated(count: u64) {
    if let Some(counter) = RECORDS_GENERATED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_generated(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_records_persisted(count: u64) {
    if let Some(counter) = RECORDS_PERSISTED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_persisted(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_flush_errors() {
    if let Some(counter) = FLUSH_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_flush_errors() {}

#[cfg(feature = "metrics")]
pub fn record_flush_duration(duration_ms: f64) {
    if let Some(histogram) = FLUSH_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_flush_duration(_duration_ms: f64) {}
