//! Dispatch channel abstraction (handoff mechanics only).
//!
//! The channel is the seam between request-side code and the processor. It is
//! intentionally **lightweight**:
//!
//! - **Non-blocking handoff**: `send` returns as soon as the command is queued
//! - **At-least-once**: a transport may redeliver; handlers must be idempotent
//! - **Transport-agnostic**: in-memory queue in this workspace, a broker elsewhere
//!
//! The channel does not know about validation; the gateway does that before
//! calling `send`.

use std::sync::Arc;

use crate::CommandEnvelope;

/// Point-to-point command transport.
pub trait CommandChannel: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Hand one command to the transport. Ownership moves to the channel.
    fn send(&self, command: CommandEnvelope) -> Result<(), Self::Error>;
}

impl<C> CommandChannel for Arc<C>
where
    C: CommandChannel + ?Sized,
{
    type Error = C::Error;

    fn send(&self, command: CommandEnvelope) -> Result<(), Self::Error> {
        (**self).send(command)
    }
}
