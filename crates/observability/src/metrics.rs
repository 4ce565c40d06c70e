//! Telemetry counters.
//!
//! Components never talk to a sink directly; they go through [`Telemetry`], which
//! keeps one atomic per counter and forwards the latest value to the sink. Every
//! forward is guarded: a disposed or failing sink turns into a no-op instead of an
//! error on the hot path. A disabled `Telemetry` does nothing at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

/// Well-known counter names.
pub mod counters {
    pub const COMMANDS_SUBMITTED: &str = "commands.submitted";
    pub const COMMANDS_REJECTED: &str = "commands.rejected";
    pub const DISPATCH_FAILURES: &str = "commands.dispatch_failures";

    pub const CONVERGENCE_CONVERGED: &str = "convergence.converged";
    pub const CONVERGENCE_TIMED_OUT: &str = "convergence.timed_out";
    pub const CONVERGENCE_CANCELLED: &str = "convergence.cancelled";
    pub const CONVERGENCE_READ_ERRORS: &str = "convergence.transient_read_errors";

    pub const PROCESSOR_WORKERS: &str = "processor.workers";
    pub const PROCESSOR_IN_FLIGHT: &str = "processor.in_flight";
    pub const PROCESSOR_QUEUE_DEPTH: &str = "processor.queue_depth";
    pub const PROCESSOR_PROCESSED: &str = "processor.processed";
    pub const PROCESSOR_FAILED: &str = "processor.failed";
    pub const RUNTIME_WORKERS: &str = "runtime.workers";

    pub const UNOBSERVED_FAILURES: &str = "tasks.unobserved_failures";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry sink has been disposed")]
    Disposed,

    #[error("telemetry sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for counter values (performance counters, metrics exporter, ...).
///
/// Implementations may fail at any time (e.g. after disposal); callers must treat
/// failures as non-fatal.
pub trait TelemetrySink: Send + Sync {
    fn set_counter(&self, name: &str, value: u64) -> Result<(), TelemetryError>;
}

impl<S> TelemetrySink for Arc<S>
where
    S: TelemetrySink + ?Sized,
{
    fn set_counter(&self, name: &str, value: u64) -> Result<(), TelemetryError> {
        (**self).set_counter(name, value)
    }
}

struct TelemetryInner {
    sink: Arc<dyn TelemetrySink>,
    counters: RwLock<HashMap<&'static str, Arc<AtomicU64>>>,
}

/// Guarded, cloneable telemetry handle.
///
/// Clones share the same counters. Distinct counters are independent atomics, so
/// concurrent updates never interfere with each other.
#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Option<Arc<TelemetryInner>>,
}

impl core::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Telemetry")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Telemetry {
    /// Telemetry that forwards to `sink`.
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Some(Arc::new(TelemetryInner {
                sink,
                counters: RwLock::new(HashMap::new()),
            })),
        }
    }

    /// Telemetry where every operation is a no-op.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Enabled only when `enabled` is true (the instrumentation-enabled setting).
    pub fn when(enabled: bool, sink: Arc<dyn TelemetrySink>) -> Self {
        if enabled { Self::new(sink) } else { Self::disabled() }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Add one to a counter and publish the new value.
    pub fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, delta: u64) {
        let Some(inner) = &self.inner else {
            return;
        };
        let Some(counter) = inner.counter(name) else {
            return;
        };
        let value = counter.fetch_add(delta, Ordering::Relaxed).saturating_add(delta);
        inner.publish(name, value);
    }

    /// Overwrite a counter (gauges sampled from the outside).
    pub fn set(&self, name: &'static str, value: u64) {
        let Some(inner) = &self.inner else {
            return;
        };
        let Some(counter) = inner.counter(name) else {
            return;
        };
        counter.store(value, Ordering::Relaxed);
        inner.publish(name, value);
    }

    /// Current local value of a counter (`None` when disabled or never touched).
    pub fn value(&self, name: &str) -> Option<u64> {
        let inner = self.inner.as_ref()?;
        let map = inner.counters.read().ok()?;
        map.get(name).map(|c| c.load(Ordering::Relaxed))
    }
}

impl TelemetryInner {
    fn counter(&self, name: &'static str) -> Option<Arc<AtomicU64>> {
        if let Some(c) = self.counters.read().ok()?.get(name) {
            return Some(c.clone());
        }

        let mut map = self.counters.write().ok()?;
        Some(map.entry(name).or_default().clone())
    }

    fn publish(&self, name: &'static str, value: u64) {
        if let Err(err) = self.sink.set_counter(name, value) {
            ::tracing::debug!(counter = name, error = %err, "telemetry update dropped");
        }
    }
}

/// In-memory sink for tests/dev. Can be disposed to simulate a torn-down sink.
#[derive(Debug, Default)]
pub struct InMemoryTelemetrySink {
    values: Mutex<HashMap<String, u64>>,
    disposed: AtomicBool,
}

impl InMemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.values.lock().ok()?.get(name).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.values.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// After disposal every update fails with [`TelemetryError::Disposed`].
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl TelemetrySink for InMemoryTelemetrySink {
    fn set_counter(&self, name: &str, value: u64) -> Result<(), TelemetryError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TelemetryError::Disposed);
        }
        let mut values = self
            .values
            .lock()
            .map_err(|_| TelemetryError::Unavailable("lock poisoned".to_string()))?;
        values.insert(name.to_string(), value);
        Ok(())
    }
}

/// Sink that writes counter updates to the trace log at `debug`.
#[derive(Debug, Clone)]
pub struct LogTelemetrySink {
    instance: String,
}

impl LogTelemetrySink {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }
}

impl TelemetrySink for LogTelemetrySink {
    fn set_counter(&self, name: &str, value: u64) -> Result<(), TelemetryError> {
        ::tracing::debug!(instance = %self.instance, counter = name, value, "telemetry");
        Ok(())
    }
}
