//! Infrastructure: command submission, read-model convergence, and the
//! supervised processing loop.

pub mod command_gateway;
pub mod config;
pub mod convergence;
pub mod processing;
pub mod read_model;


pub use command_gateway::{CommandGateway, DispatchError, SubmitError, SubmitReceipt};
pub use config::WorkerSettings;
pub use convergence::{Convergence, ConvergenceBudget, ConvergencePoller, ConvergenceRequest};
pub use processing::{ProcessingLoop, ProcessingLoopConfig, ProcessingLoopHandle};
pub use read_model::{InMemoryVersionedStore, ReadStoreError, VersionedReadStore};
