//! Error vocabulary shared across the workspace.

use thiserror::Error;

/// A command failed structural validation before reaching the dispatch channel.
///
/// This is always the caller's fault and is never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `submit` was called with nothing to send.
    #[error("no commands submitted")]
    EmptyBatch,

    /// The command carries a nil identifier.
    #[error("command at position {position} has a nil command id")]
    MissingCommandId { position: usize },

    /// The command does not name the entity it targets.
    #[error("command at position {position} has a nil target id")]
    MissingTargetId { position: usize },

    /// The gateway does not know how to route this command type.
    #[error("command at position {position} has unknown type `{command_type}`")]
    UnknownCommandType {
        position: usize,
        command_type: String,
    },

    /// The same command id appears twice in one submission.
    #[error("command id {command_id} submitted twice in one batch")]
    DuplicateCommandId { command_id: String },

    /// The payload could not be encoded.
    #[error("command payload could not be encoded: {0}")]
    Payload(String),
}

/// Domain-level error raised by command handlers.
///
/// Deterministic business failures only; infrastructure errors belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// The command's expected version did not match (optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
