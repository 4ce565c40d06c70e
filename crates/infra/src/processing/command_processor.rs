//! In-memory command processor: drains the command channel and routes each
//! command to the handler registered for its type.
//!
//! - At-least-once: handlers must be idempotent
//! - Each command runs in its own task; an error or panic is reported as an
//!   unobserved failure and the worker moves on
//! - `stop` stops pulling new commands and waits for in-flight ones up to the
//!   drain timeout; units still running after that are aborted and reported

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use catchup_messaging::{Command, CommandEnvelope, CommandReceiver, QueueDepth};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::failures::UnobservedFailures;
use super::processor::{Processor, ProcessorContext, ProcessorHealth, StartError};

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: CommandEnvelope) -> anyhow::Result<()>;
}

#[async_trait]
impl<H> CommandHandler for Arc<H>
where
    H: CommandHandler + ?Sized,
{
    async fn handle(&self, command: CommandEnvelope) -> anyhow::Result<()> {
        (**self).handle(command).await
    }
}

/// Adapts an async closure over a typed command.
struct FnHandler<C, F> {
    f: F,
    _command: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C, F, Fut> CommandHandler for FnHandler<C, F>
where
    C: Command,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, command: CommandEnvelope) -> anyhow::Result<()> {
        let typed: C = command
            .decode()
            .with_context(|| format!("decoding {} payload", C::COMMAND_TYPE))?;
        (self.f)(typed).await
    }
}

/// Command type -> handler routing table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `C` to `handler`. A later registration for the same type wins.
    pub fn with_handler<C: Command>(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handlers
            .insert(C::COMMAND_TYPE.to_string(), Arc::new(handler));
        self
    }

    pub fn with_fn<C, F, Fut>(self, f: F) -> Self
    where
        C: Command,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_handler::<C>(FnHandler {
            f,
            _command: PhantomData,
        })
    }

    pub fn get(&self, command_type: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command_type).cloned()
    }

    /// Registered command types, for declaring them on a gateway.
    pub fn command_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Receiver shared by every processor instance a loop creates over its lifetime.
#[derive(Debug, Clone)]
pub struct SharedReceiver {
    inner: Arc<Mutex<CommandReceiver>>,
    depth: QueueDepth,
    closed: Arc<AtomicBool>,
}

impl SharedReceiver {
    pub fn new(receiver: CommandReceiver) -> Self {
        let depth = receiver.depth();
        Self {
            inner: Arc::new(Mutex::new(receiver)),
            depth,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once the channel has been observed closed and drained.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    async fn next(&self) -> Option<CommandEnvelope> {
        let mut rx = self.inner.lock().await;
        let next = rx.recv().await;
        if next.is_none() {
            self.closed.store(true, Ordering::Release);
        }
        next
    }
}

#[derive(Debug, Default)]
struct Stats {
    in_flight: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    workers: JoinSet<()>,
}

#[derive(Debug)]
pub struct CommandProcessor {
    receiver: SharedReceiver,
    handlers: Arc<HandlerRegistry>,
    worker_count: usize,
    stats: Arc<Stats>,
    running: Option<Running>,
}

impl CommandProcessor {
    pub fn new(receiver: SharedReceiver, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            receiver,
            handlers,
            worker_count: 1,
            stats: Arc::new(Stats::default()),
            running: None,
        }
    }

    /// Number of concurrent worker tasks. Zero is raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    async fn start(&mut self, context: ProcessorContext) -> Result<(), StartError> {
        if self.running.is_some() {
            return Err(StartError::AlreadyStarted);
        }
        if self.handlers.is_empty() {
            return Err(StartError::NoHandlers);
        }
        if self.receiver.is_closed() {
            return Err(StartError::Unavailable("command channel closed".to_string()));
        }

        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        for index in 0..self.worker_count {
            let worker = Worker {
                index,
                receiver: self.receiver.clone(),
                handlers: Arc::clone(&self.handlers),
                stats: Arc::clone(&self.stats),
                failures: context.failures.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }

        info!(
            workers = self.worker_count,
            handlers = self.handlers.len(),
            "command processor started"
        );
        self.running = Some(Running { cancel, workers });
        Ok(())
    }

    async fn stop(&mut self, drain_timeout: Duration) {
        let Some(mut running) = self.running.take() else {
            debug!("command processor stop ignored; not running");
            return;
        };

        running.cancel.cancel();
        let drained = tokio::time::timeout(drain_timeout, async {
            while running.workers.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => info!(
                processed = self.stats.processed.load(Ordering::Relaxed),
                failed = self.stats.failed.load(Ordering::Relaxed),
                "command processor stopped"
            ),
            Err(_) => {
                warn!(
                    in_flight = self.stats.in_flight.load(Ordering::Relaxed),
                    ?drain_timeout,
                    "drain timeout elapsed; abandoning in-flight commands"
                );
                running.workers.abort_all();
                while running.workers.join_next().await.is_some() {}
            }
        }
    }

    fn health(&self) -> ProcessorHealth {
        ProcessorHealth {
            workers: if self.running.is_some() {
                self.worker_count
            } else {
                0
            },
            in_flight: self.stats.in_flight.load(Ordering::Relaxed),
            queue_depth: self.receiver.depth(),
            processed: self.stats.processed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    index: usize,
    receiver: SharedReceiver,
    handlers: Arc<HandlerRegistry>,
    stats: Arc<Stats>,
    failures: UnobservedFailures,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.receiver.next() => next,
            };

            let Some(envelope) = next else {
                debug!(worker = self.index, "command channel closed; worker exiting");
                break;
            };

            self.process(envelope).await;
        }
    }

    async fn process(&self, envelope: CommandEnvelope) {
        let unit = format!("{}:{}", envelope.command_type(), envelope.command_id());

        let Some(handler) = self.handlers.get(envelope.command_type()) else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            self.failures
                .report(&unit, &"no handler registered for command type");
            return;
        };

        let guard = InFlight::enter(&self.stats, &self.failures, &unit);
        let ok = self
            .failures
            .run_isolated(&unit, async move { handler.handle(envelope).await })
            .await;
        guard.finish(ok);
    }
}

/// Tracks one unit of work. Dropped without `finish`, the unit was abandoned
/// at the drain timeout and is reported as a failure.
struct InFlight<'a> {
    stats: &'a Stats,
    failures: &'a UnobservedFailures,
    unit: &'a str,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn enter(stats: &'a Stats, failures: &'a UnobservedFailures, unit: &'a str) -> Self {
        stats.in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            stats,
            failures,
            unit,
            done: false,
        }
    }

    fn finish(mut self, ok: bool) {
        self.done = true;
        let counter = if ok {
            &self.stats.processed
        } else {
            &self.stats.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        if !self.done {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            self.failures
                .report(self.unit, &"abandoned at drain timeout");
        }
    }
}
