//! Supervised background processing: the processor contract, the in-memory
//! command processor, and the loop that owns a processor's lifetime.

pub mod command_processor;
pub mod failures;
pub mod lifecycle;
pub mod maintenance;
pub mod processing_loop;
pub mod processor;

pub use command_processor::{CommandHandler, CommandProcessor, HandlerRegistry, SharedReceiver};
pub use failures::UnobservedFailures;
pub use lifecycle::{LifecycleError, LifecycleState, LoopState};
pub use maintenance::{
    AnyMaintenance, EnvMaintenanceSource, MaintenanceFlag, MaintenanceSource, parse_switch,
};
pub use processing_loop::{
    LoopExitError, ProcessingLoop, ProcessingLoopConfig, ProcessingLoopHandle,
};
pub use processor::{Processor, ProcessorContext, ProcessorFactory, ProcessorHealth, StartError};
