//! In-memory bounded command queue for tests/dev and single-process hosts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::{CommandChannel, CommandEnvelope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryChannelError {
    /// Backpressure: the processor is not keeping up.
    #[error("command channel is full (capacity {capacity})")]
    Full { capacity: usize },

    /// The receiving side was dropped (processor gone).
    #[error("command channel is closed")]
    Closed,
}

/// Shared gauge of commands queued but not yet received.
#[derive(Debug, Clone, Default)]
pub struct QueueDepth(Arc<AtomicUsize>);

impl QueueDepth {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Always paired with an earlier `incr`, so the gauge never goes below zero.
    fn decr(&self) {
        let previous = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
        debug_assert!(previous.is_ok(), "queue depth decremented below zero");
    }
}

/// Sending half: cheap to clone, shared by every gateway in the process.
///
/// - No IO
/// - Bounded (`send` fails fast instead of blocking the request path)
/// - FIFO per channel
#[derive(Debug, Clone)]
pub struct InMemoryCommandChannel {
    tx: mpsc::Sender<CommandEnvelope>,
    depth: QueueDepth,
    capacity: usize,
}

/// Receiving half, owned by the processor.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<CommandEnvelope>,
    depth: QueueDepth,
}

impl InMemoryCommandChannel {
    /// Create a bounded channel. A capacity of zero is raised to one.
    pub fn bounded(capacity: usize) -> (Self, CommandReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let depth = QueueDepth::default();

        (
            Self {
                tx,
                depth: depth.clone(),
                capacity,
            },
            CommandReceiver { rx, depth },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> QueueDepth {
        self.depth.clone()
    }
}

impl CommandChannel for InMemoryCommandChannel {
    type Error = InMemoryChannelError;

    fn send(&self, command: CommandEnvelope) -> Result<(), Self::Error> {
        // Count before handing off so the receiver never observes a negative depth.
        self.depth.incr();
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.depth.decr();
                Err(match err {
                    mpsc::error::TrySendError::Full(_) => InMemoryChannelError::Full {
                        capacity: self.capacity,
                    },
                    mpsc::error::TrySendError::Closed(_) => InMemoryChannelError::Closed,
                })
            }
        }
    }
}

impl CommandReceiver {
    /// Wait for the next command. Returns `None` once every sender is gone and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<CommandEnvelope> {
        let next = self.rx.recv().await;
        if next.is_some() {
            self.depth.decr();
        }
        next
    }

    pub fn depth(&self) -> QueueDepth {
        self.depth.clone()
    }
}
