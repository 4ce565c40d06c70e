use serde::Serialize;
use serde::de::DeserializeOwned;

use catchup_core::{CommandId, EntityId};

/// A command targets a specific entity (command abstraction).
///
/// Commands represent **intent** - a request to change the state of one entity.
/// They are produced by callers, handed to the dispatch channel, and consumed by
/// exactly one handler per delivery. Handlers must be idempotent because delivery
/// is at-least-once.
///
/// ## Routing
///
/// `COMMAND_TYPE` is the stable routing key. The gateway refuses command types it
/// was not told about, and the processor routes envelopes to handlers by this key.
///
/// ## Optimistic concurrency
///
/// `expected_version` is a hint only: the handler decides what to do when the
/// entity has moved past it. The gateway never blocks on it.
///
/// ## Design Constraints
///
/// Commands must be:
/// - **Serializable**: they travel as JSON payloads inside a `CommandEnvelope`
/// - **Send + Sync + 'static**: they cross task boundaries and own all their data
pub trait Command: Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable command name/type identifier (e.g. "registration.register_to_conference").
    const COMMAND_TYPE: &'static str;

    fn command_id(&self) -> CommandId;

    fn target_id(&self) -> EntityId;

    fn expected_version(&self) -> Option<u64> {
        None
    }
}
