//! Command submission (request-side half of the pipeline).
//!
//! The gateway is the only way request code hands work to the processor:
//!
//! ```text
//! commands
//!   ↓
//! 1. Validate structure (ids present, type known, no duplicates)
//!   ↓
//! 2. Stamp (batch id, position, submission time)
//!   ↓
//! 3. Hand off to the dispatch channel, one command at a time
//! ```
//!
//! `submit` returns as soon as the channel accepted the commands. It never waits
//! for processing: the caller is expected to follow up with a
//! [`ConvergencePoller`](crate::convergence::ConvergencePoller) wait, which bounds
//! end-to-end latency explicitly.
//!
//! A batch is a transport convenience only. Commands are validated together (a
//! single invalid command rejects the whole submission before anything is sent),
//! but each accepted command is handled independently; there is no atomicity
//! across them.

use std::collections::HashSet;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, warn};

use catchup_core::{BatchId, CommandId, ValidationError};
use catchup_messaging::{Command, CommandChannel, CommandEnvelope, DispatchStamp};
use catchup_observability::{Telemetry, counters};

/// The channel refused a command. Earlier commands of the same batch may already
/// be on their way (`accepted` of them); retrying the whole submit is safe because
/// handlers are idempotent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dispatch of command {command_id} failed after {accepted} of {total} commands: {reason}")]
pub struct DispatchError {
    pub command_id: CommandId,
    pub accepted: usize,
    pub total: usize,
    pub reason: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Malformed command; the caller's fault, never retried.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport handoff failed; the caller may retry the submit.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }
}

/// Proof of handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub batch_id: BatchId,
    pub command_ids: Vec<CommandId>,
}

/// Wrap a typed command, reporting encoding failures as validation errors.
pub fn envelope<C: Command>(command: &C) -> Result<CommandEnvelope, ValidationError> {
    CommandEnvelope::from_typed(command).map_err(|e| ValidationError::Payload(e.to_string()))
}

/// Validates, stamps and hands commands to a [`CommandChannel`].
///
/// Only command types registered with [`register`](Self::register) are accepted.
#[derive(Debug)]
pub struct CommandGateway<C> {
    channel: C,
    known_types: HashSet<String>,
    telemetry: Telemetry,
}

impl<C> CommandGateway<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            known_types: HashSet::new(),
            telemetry: Telemetry::disabled(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Declare a command type as routable.
    pub fn register<Cmd: Command>(self) -> Self {
        self.register_type(Cmd::COMMAND_TYPE)
    }

    pub fn register_type(mut self, command_type: impl Into<String>) -> Self {
        self.known_types.insert(command_type.into());
        self
    }

    pub fn knows(&self, command_type: &str) -> bool {
        self.known_types.contains(command_type)
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C> CommandGateway<C>
where
    C: CommandChannel,
{
    /// Submit one typed command.
    pub fn send<Cmd: Command>(&self, command: &Cmd) -> Result<SubmitReceipt, SubmitError> {
        self.submit(vec![envelope(command)?])
    }

    /// Validate, stamp and dispatch `commands` in order.
    pub fn submit(&self, commands: Vec<CommandEnvelope>) -> Result<SubmitReceipt, SubmitError> {
        if let Err(err) = self.validate(&commands) {
            warn!(error = %err, "rejected malformed command submission");
            self.telemetry.increment(counters::COMMANDS_REJECTED);
            return Err(err.into());
        }

        let batch_id = BatchId::new();
        let submitted_at = Utc::now();
        let total = commands.len();
        let mut command_ids = Vec::with_capacity(total);

        for (position, command) in commands.into_iter().enumerate() {
            let command_id = command.command_id();
            let command_type = command.command_type().to_string();
            let stamped = command.stamped(DispatchStamp {
                batch_id,
                position: u32::try_from(position).unwrap_or(u32::MAX),
                submitted_at,
            });

            if let Err(err) = self.channel.send(stamped) {
                error!(
                    batch = %batch_id,
                    command = %command_id,
                    command_type = %command_type,
                    accepted = position,
                    error = %err,
                    "command dispatch failed"
                );
                self.telemetry.increment(counters::DISPATCH_FAILURES);
                return Err(DispatchError {
                    command_id,
                    accepted: position,
                    total,
                    reason: err.to_string(),
                }
                .into());
            }

            self.telemetry.increment(counters::COMMANDS_SUBMITTED);
            debug!(batch = %batch_id, command = %command_id, command_type = %command_type, "command dispatched");
            command_ids.push(command_id);
        }

        Ok(SubmitReceipt {
            batch_id,
            command_ids,
        })
    }

    fn validate(&self, commands: &[CommandEnvelope]) -> Result<(), ValidationError> {
        if commands.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }

        let mut seen = HashSet::with_capacity(commands.len());
        for (position, command) in commands.iter().enumerate() {
            if command.command_id().is_nil() {
                return Err(ValidationError::MissingCommandId { position });
            }
            if command.target_id().is_nil() {
                return Err(ValidationError::MissingTargetId { position });
            }
            if !self.knows(command.command_type()) {
                return Err(ValidationError::UnknownCommandType {
                    position,
                    command_type: command.command_type().to_string(),
                });
            }
            if !seen.insert(command.command_id()) {
                return Err(ValidationError::DuplicateCommandId {
                    command_id: command.command_id().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use catchup_core::EntityId;
    use catchup_messaging::{InMemoryCommandChannel, InMemoryChannelError};
    use catchup_observability::InMemoryTelemetrySink;

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ReserveSeats {
        id: CommandId,
        order_id: EntityId,
        quantity: u32,
    }

    impl Command for ReserveSeats {
        const COMMAND_TYPE: &'static str = "test.reserve_seats";

        fn command_id(&self) -> CommandId {
            self.id
        }

        fn target_id(&self) -> EntityId {
            self.order_id
        }
    }

    fn reserve(order_id: EntityId) -> ReserveSeats {
        ReserveSeats {
            id: CommandId::new(),
            order_id,
            quantity: 2,
        }
    }

    fn setup(
        capacity: usize,
    ) -> (
        CommandGateway<InMemoryCommandChannel>,
        catchup_messaging::CommandReceiver,
        Arc<InMemoryTelemetrySink>,
    ) {
        let (channel, rx) = InMemoryCommandChannel::bounded(capacity);
        let sink = Arc::new(InMemoryTelemetrySink::new());
        let gateway = CommandGateway::new(channel)
            .with_telemetry(Telemetry::new(sink.clone()))
            .register::<ReserveSeats>();
        (gateway, rx, sink)
    }

    #[tokio::test]
    async fn valid_batch_is_stamped_and_dispatched_in_order() {
        let (gateway, mut rx, sink) = setup(8);
        let first = reserve(EntityId::new());
        let second = reserve(EntityId::new());

        let receipt = gateway
            .submit(vec![envelope(&first).unwrap(), envelope(&second).unwrap()])
            .unwrap();

        assert_eq!(receipt.command_ids, vec![first.id, second.id]);
        for (expected_pos, expected_id) in [(0, first.id), (1, second.id)] {
            let env = rx.recv().await.unwrap();
            let stamp = env.stamp().copied().unwrap();
            assert_eq!(env.command_id(), expected_id);
            assert_eq!(stamp.position, expected_pos);
            assert_eq!(stamp.batch_id, receipt.batch_id);
        }
        assert_eq!(sink.counter(counters::COMMANDS_SUBMITTED), Some(2));
    }

    #[test]
    fn invalid_command_never_reaches_the_channel() {
        let (gateway, _rx, sink) = setup(8);
        let valid = envelope(&reserve(EntityId::new())).unwrap();
        let no_target = envelope(&reserve(EntityId::nil())).unwrap();

        let err = gateway.submit(vec![valid, no_target]).unwrap_err();

        assert_eq!(
            err,
            SubmitError::Validation(ValidationError::MissingTargetId { position: 1 })
        );
        assert!(!err.is_retryable());
        assert_eq!(gateway.channel().depth().get(), 0);
        assert_eq!(sink.counter(counters::COMMANDS_SUBMITTED), None);
        assert_eq!(sink.counter(counters::COMMANDS_REJECTED), Some(1));
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let (gateway, _rx, _sink) = setup(8);
        let env = CommandEnvelope::new(
            CommandId::new(),
            "test.unregistered",
            EntityId::new(),
            serde_json::json!({}),
        );

        let err = gateway.submit(vec![env]).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::UnknownCommandType { position: 0, .. })
        ));
    }

    #[test]
    fn nil_command_id_and_duplicates_are_rejected() {
        let (gateway, _rx, _sink) = setup(8);
        let mut cmd = reserve(EntityId::new());
        cmd.id = CommandId::nil();
        assert_eq!(
            gateway.send(&cmd).unwrap_err(),
            SubmitError::Validation(ValidationError::MissingCommandId { position: 0 })
        );

        let dup = envelope(&reserve(EntityId::new())).unwrap();
        let err = gateway.submit(vec![dup.clone(), dup]).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::DuplicateCommandId { .. })
        ));
    }

    #[test]
    fn empty_submission_is_rejected() {
        let (gateway, _rx, _sink) = setup(8);
        assert_eq!(
            gateway.submit(vec![]).unwrap_err(),
            SubmitError::Validation(ValidationError::EmptyBatch)
        );
    }

    #[test]
    fn full_channel_reports_partial_handoff() {
        let (gateway, _rx, sink) = setup(1);
        let first = envelope(&reserve(EntityId::new())).unwrap();
        let second = envelope(&reserve(EntityId::new())).unwrap();
        let second_id = second.command_id();

        let err = gateway.submit(vec![first, second]).unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(
            err,
            SubmitError::Dispatch(DispatchError {
                command_id: second_id,
                accepted: 1,
                total: 2,
                reason: InMemoryChannelError::Full { capacity: 1 }.to_string(),
            })
        );
        assert_eq!(sink.counter(counters::COMMANDS_SUBMITTED), Some(1));
        assert_eq!(sink.counter(counters::DISPATCH_FAILURES), Some(1));
    }

    #[test]
    fn closed_channel_is_a_dispatch_error() {
        let (gateway, rx, _sink) = setup(4);
        drop(rx);

        let err = gateway.send(&reserve(EntityId::new())).unwrap_err();
        assert!(matches!(err, SubmitError::Dispatch(DispatchError { accepted: 0, .. })));
    }
}
