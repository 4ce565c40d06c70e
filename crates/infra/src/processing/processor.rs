use std::time::Duration;

use async_trait::async_trait;
use catchup_observability::Telemetry;
use serde::Serialize;
use thiserror::Error;

use super::failures::UnobservedFailures;

/// Fatal processor start failure. Propagated to the host.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("processor already started")]
    AlreadyStarted,

    #[error("no command handlers registered")]
    NoHandlers,

    #[error("processor dependency unavailable: {0}")]
    Unavailable(String),
}

/// What a processor receives from the loop that owns it.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    pub failures: UnobservedFailures,
    pub telemetry: Telemetry,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorHealth {
    pub workers: usize,
    pub in_flight: usize,
    pub queue_depth: usize,
    pub processed: u64,
    pub failed: u64,
}

/// The long-running unit a [`ProcessingLoop`](super::ProcessingLoop) supervises.
#[async_trait]
pub trait Processor: Send {
    async fn start(&mut self, context: ProcessorContext) -> Result<(), StartError>;

    /// Best effort; waits at most `drain_timeout` for in-flight work. Calling it
    /// twice, or before `start`, is a no-op.
    async fn stop(&mut self, drain_timeout: Duration);

    fn health(&self) -> ProcessorHealth;
}

/// Builds a fresh processor each time the loop (re)starts.
pub trait ProcessorFactory: Send {
    type Processor: Processor + 'static;

    fn create(&mut self) -> Result<Self::Processor, StartError>;
}

impl<F, P> ProcessorFactory for F
where
    F: FnMut() -> Result<P, StartError> + Send,
    P: Processor + 'static,
{
    type Processor = P;

    fn create(&mut self) -> Result<P, StartError> {
        self()
    }
}
