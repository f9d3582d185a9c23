//! # batch-shim-adapters
//!
//! Adapter implementations for ports: JSON logging, embedded-metric-format
//! telemetry, and the SQS wire shapes. This crate depends on `ports`,
//! `domain`, and `shared`.

pub mod log_sink;
pub mod logger;
pub mod metrics;
pub mod sqs;

pub use log_sink::{LogSink, StdoutLogSink};
pub use logger::JsonLogger;
pub use metrics::LogMetricSink;
pub use sqs::{BatchItemFailure, SqsEvent, SqsEventResponse, SqsMessage, SqsMessageAttribute};

/// Returns the adapters crate version.
#[must_use]
pub const fn adapters_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
