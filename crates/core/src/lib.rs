//! `catchup-core` — identifiers and error vocabulary shared by every crate.
//!
//! This crate has **no runtime concerns** (no async, no IO); the messaging and
//! infrastructure layers build on it.

pub mod error;
pub mod id;

pub use error::{DomainError, ValidationError};
pub use id::{BatchId, CommandId, EntityId};
