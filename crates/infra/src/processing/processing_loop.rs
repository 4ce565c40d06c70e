use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use catchup_observability::{Telemetry, counters};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::failures::{UnobservedFailures, panic_message};
use super::lifecycle::{LifecycleState, LoopState};
use super::maintenance::{MaintenanceFlag, MaintenanceSource};
use super::processor::{Processor, ProcessorContext, ProcessorFactory, ProcessorHealth, StartError};

#[derive(Debug, Clone)]
pub struct ProcessingLoopConfig {
    pub name: String,
    /// Health sampling cadence while running; the maintenance source is re-read
    /// on the same tick.
    pub sample_interval: Duration,
    /// How often the maintenance source is re-read while idling in maintenance.
    pub maintenance_refresh: Duration,
    pub drain_timeout: Duration,
}

impl Default for ProcessingLoopConfig {
    fn default() -> Self {
        Self {
            name: "processing-loop".to_string(),
            sample_interval: Duration::from_secs(10),
            maintenance_refresh: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl ProcessingLoopConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_maintenance_refresh(mut self, interval: Duration) -> Self {
        self.maintenance_refresh = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum LoopExitError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error("processing loop task failed: {0}")]
    Crashed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Shutdown,
    Maintenance,
}

/// Supervises one processor at a time: starts it, samples its health, and stops
/// it on shutdown or when maintenance mode is switched on.
pub struct ProcessingLoop<F> {
    config: ProcessingLoopConfig,
    factory: F,
    maintenance: Arc<dyn MaintenanceSource>,
    telemetry: Telemetry,
    failures: UnobservedFailures,
    state: LifecycleState,
}

impl<F> ProcessingLoop<F>
where
    F: ProcessorFactory,
{
    pub fn new(config: ProcessingLoopConfig, factory: F) -> Self {
        let failures = UnobservedFailures::new(config.name.clone(), Telemetry::disabled());
        Self {
            config,
            factory,
            maintenance: Arc::new(MaintenanceFlag::default()),
            telemetry: Telemetry::disabled(),
            failures,
            state: LifecycleState::new(),
        }
    }

    pub fn with_maintenance(mut self, source: Arc<dyn MaintenanceSource>) -> Self {
        self.maintenance = source;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.failures = UnobservedFailures::new(self.config.name.clone(), telemetry.clone());
        self.telemetry = telemetry;
        self
    }

    /// Failure handler shared with every processor this loop starts.
    pub fn failures(&self) -> UnobservedFailures {
        self.failures.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` fires. Only a processor start failure is an error.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), StartError> {
        info!(worker = %self.config.name, "processing loop activated");

        let result = self.drive(&shutdown).await;
        match &result {
            Ok(()) => info!(worker = %self.config.name, "processing loop stopped"),
            Err(err) => error!(worker = %self.config.name, error = %err, "processor failed to start"),
        }
        result
    }

    pub fn spawn(self) -> ProcessingLoopHandle
    where
        F: 'static,
    {
        let shutdown = CancellationToken::new();
        let state = self.watch_state();
        let failures = self.failures();
        let join = tokio::spawn(self.run(shutdown.clone()));

        ProcessingLoopHandle {
            shutdown,
            state,
            failures,
            join,
        }
    }

    async fn drive(&mut self, shutdown: &CancellationToken) -> Result<(), StartError> {
        loop {
            if shutdown.is_cancelled() {
                self.enter(LoopState::Stopped);
                return Ok(());
            }

            if self.maintenance.is_in_maintenance() {
                if self.state.current() != LoopState::Maintenance {
                    self.enter(LoopState::Maintenance);
                }
                warn!(worker = %self.config.name, "maintenance mode on; processor not started");
                if self.idle_in_maintenance(shutdown).await == StopReason::Shutdown {
                    self.enter(LoopState::Stopped);
                    return Ok(());
                }
                info!(worker = %self.config.name, "maintenance mode cleared");
            }

            self.enter(LoopState::Starting);
            let mut processor = match self.factory.create() {
                Ok(p) => p,
                Err(err) => {
                    self.enter(LoopState::Stopped);
                    return Err(err);
                }
            };

            let context = ProcessorContext {
                failures: self.failures.clone(),
                telemetry: self.telemetry.clone(),
            };
            if let Err(err) = processor.start(context).await {
                processor.stop(Duration::ZERO).await;
                self.enter(LoopState::Stopped);
                return Err(err);
            }
            self.enter(LoopState::Running);
            info!(worker = %self.config.name, "processor running");

            let reason = self.supervise(&mut processor, shutdown).await;

            self.enter(LoopState::Stopping);
            processor.stop(self.config.drain_timeout).await;
            self.publish(ProcessorHealth::default());

            match reason {
                StopReason::Shutdown => {
                    self.enter(LoopState::Stopped);
                    return Ok(());
                }
                StopReason::Maintenance => {
                    self.enter(LoopState::Maintenance);
                }
            }
        }
    }

    async fn supervise(
        &mut self,
        processor: &mut F::Processor,
        shutdown: &CancellationToken,
    ) -> StopReason {
        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StopReason::Shutdown,
                _ = ticker.tick() => {}
            }

            self.sample(processor);

            if self.maintenance.is_in_maintenance() {
                warn!(worker = %self.config.name, "maintenance mode switched on; suspending processor");
                return StopReason::Maintenance;
            }
        }
    }

    async fn idle_in_maintenance(&mut self, shutdown: &CancellationToken) -> StopReason {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StopReason::Shutdown,
                _ = tokio::time::sleep(self.config.maintenance_refresh) => {}
            }

            if !self.maintenance.is_in_maintenance() {
                return StopReason::Maintenance;
            }
        }
    }

    fn sample(&self, processor: &F::Processor) {
        if !self.telemetry.is_enabled() {
            return;
        }

        match catch_unwind(AssertUnwindSafe(|| processor.health())) {
            Ok(health) => self.publish(health),
            Err(payload) => debug!(
                worker = %self.config.name,
                error = %panic_message(payload),
                "health sampling failed"
            ),
        }
    }

    fn publish(&self, health: ProcessorHealth) {
        self.telemetry
            .set(counters::PROCESSOR_WORKERS, health.workers as u64);
        self.telemetry
            .set(counters::PROCESSOR_IN_FLIGHT, health.in_flight as u64);
        self.telemetry
            .set(counters::PROCESSOR_QUEUE_DEPTH, health.queue_depth as u64);
        self.telemetry
            .set(counters::PROCESSOR_PROCESSED, health.processed);
        self.telemetry.set(counters::PROCESSOR_FAILED, health.failed);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            self.telemetry
                .set(counters::RUNTIME_WORKERS, runtime.metrics().num_workers() as u64);
        }
    }

    fn enter(&self, next: LoopState) {
        if let Err(err) = self.state.advance(next) {
            error!(worker = %self.config.name, error = %err, "lifecycle violation");
        } else {
            debug!(worker = %self.config.name, state = ?next, "processing loop state");
        }
    }
}

/// Owner-side control of a spawned [`ProcessingLoop`].
#[derive(Debug)]
pub struct ProcessingLoopHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<LoopState>,
    failures: UnobservedFailures,
    join: JoinHandle<Result<(), StartError>>,
}

impl ProcessingLoopHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    pub fn failures(&self) -> &UnobservedFailures {
        &self.failures
    }

    /// Token that stops the loop when cancelled, for signal listeners.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request a graceful stop and wait for the loop to reach `Stopped`.
    pub async fn shutdown(self) -> Result<(), LoopExitError> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for the loop to exit on its own (start failure) or after a shutdown.
    pub async fn join(self) -> Result<(), LoopExitError> {
        match self.join.await {
            Ok(result) => result.map_err(LoopExitError::from),
            Err(err) if err.is_panic() => {
                Err(LoopExitError::Crashed(panic_message(err.into_panic())))
            }
            Err(err) => Err(LoopExitError::Crashed(err.to_string())),
        }
    }
}
