use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use catchup_observability::{Telemetry, counters};
use tokio::task::JoinHandle;
use tracing::error;

/// Sink for failures of background work nobody awaits.
///
/// Each report is logged and counted, and the telemetry counter is updated when
/// telemetry is enabled. Reporting never panics and never propagates the failure.
#[derive(Debug, Clone)]
pub struct UnobservedFailures {
    scope: Arc<str>,
    count: Arc<AtomicU64>,
    telemetry: Telemetry,
}

impl UnobservedFailures {
    pub fn new(scope: impl Into<String>, telemetry: Telemetry) -> Self {
        Self {
            scope: Arc::from(scope.into()),
            count: Arc::new(AtomicU64::new(0)),
            telemetry,
        }
    }

    pub fn report(&self, unit: &str, failure: &dyn Display) {
        let total = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        error!(
            worker = %self.scope,
            unit,
            error = %failure,
            total,
            "unobserved background failure"
        );
        self.telemetry.increment(counters::UNOBSERVED_FAILURES);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Run `work` in its own task and wait for it, reporting an error or panic.
    ///
    /// Returns `true` when the unit completed successfully. Cancellation of the
    /// inner task (runtime shutdown) is not a failure and yields `false` silently.
    /// Dropping the returned future aborts the inner task.
    pub async fn run_isolated<F>(&self, unit: &str, work: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut task = AbortOnDrop(tokio::spawn(work));
        match (&mut task.0).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                self.report(unit, &format_args!("{err:#}"));
                false
            }
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                self.report(unit, &format_args!("panicked: {message}"));
                false
            }
            Err(_) => false,
        }
    }

    /// Fire-and-forget variant of [`run_isolated`](Self::run_isolated).
    pub fn spawn_isolated<F>(&self, unit: impl Into<String>, work: F) -> JoinHandle<bool>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let this = self.clone();
        let unit = unit.into();
        tokio::spawn(async move { this.run_isolated(&unit, work).await })
    }
}

/// Aborts the wrapped task when dropped, so it never outlives its waiter.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
