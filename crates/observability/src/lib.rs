//! Tracing, logging, telemetry counters (shared setup).

pub use crate::tracing::LogFormat;

/// Initialize process-wide observability (tracing/logging) with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize with an explicit log format (pretty output for local runs).
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Telemetry counters and the sink contract.
pub mod metrics;

pub use metrics::{
    InMemoryTelemetrySink, LogTelemetrySink, Telemetry, TelemetryError, TelemetrySink, counters,
};
