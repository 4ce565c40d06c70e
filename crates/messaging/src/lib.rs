//! Commands, their transport envelope, the dispatch channel contract, and
//! versioned read-model snapshots.

pub mod channel;
pub mod command;
pub mod envelope;
pub mod in_memory_channel;
pub mod projection;

pub use channel::CommandChannel;
pub use command::Command;
pub use envelope::{CommandEnvelope, DispatchStamp};
pub use in_memory_channel::{
    CommandReceiver, InMemoryChannelError, InMemoryCommandChannel, QueueDepth,
};
pub use projection::VersionedProjection;
