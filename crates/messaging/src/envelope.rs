use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use catchup_core::{BatchId, CommandId, EntityId};

use crate::Command;

/// Metadata added by the gateway at handoff time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStamp {
    pub batch_id: BatchId,
    /// Position of the command inside its submission (0-based).
    pub position: u32,
    pub submitted_at: DateTime<Utc>,
}

/// Envelope for a command: routing metadata plus a JSON payload.
///
/// This is the unit that travels through the dispatch channel. Once handed to
/// the channel, the envelope is owned by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    command_id: CommandId,
    command_type: String,
    target_id: EntityId,
    expected_version: Option<u64>,
    payload: JsonValue,
    stamp: Option<DispatchStamp>,
}

impl CommandEnvelope {
    pub fn new(
        command_id: CommandId,
        command_type: impl Into<String>,
        target_id: EntityId,
        payload: JsonValue,
    ) -> Self {
        Self {
            command_id,
            command_type: command_type.into(),
            target_id,
            expected_version: None,
            payload,
            stamp: None,
        }
    }

    /// Wrap a typed command, serializing it into the payload.
    pub fn from_typed<C: Command>(command: &C) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(command)?;
        Ok(Self {
            command_id: command.command_id(),
            command_type: C::COMMAND_TYPE.to_string(),
            target_id: command.target_id(),
            expected_version: command.expected_version(),
            payload,
            stamp: None,
        })
    }

    pub fn with_expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Attach dispatch metadata. Replaces any earlier stamp.
    pub fn stamped(mut self, stamp: DispatchStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn target_id(&self) -> EntityId {
        self.target_id
    }

    pub fn expected_version(&self) -> Option<u64> {
        self.expected_version
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn stamp(&self) -> Option<&DispatchStamp> {
        self.stamp.as_ref()
    }

    /// Decode the payload back into the typed command.
    pub fn decode<C: Command>(&self) -> Result<C, serde_json::Error> {
        C::deserialize(&self.payload)
    }
}
