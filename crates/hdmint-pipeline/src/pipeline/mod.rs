pub mod aggregator;
pub mod config;
pub mod error;
pub mod pool;
pub mod run;
pub mod streaming;
pub mod telemetry;

#[cfg(test)]
mod tests;
