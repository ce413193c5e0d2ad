//! Per-request actors and the reconciliation loop that drives them.

pub mod actor;
pub mod actors_manager;
pub mod commands;
pub mod errors;
pub mod notify;
pub mod processor;
pub mod protocol;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use actor::{ActorDeps, ActorError, DeadLetter, EboActor, TerminateHook};
pub use actors_manager::{ActorsManagerError, EboActorsManager};
pub use processor::{EboProcessor, ProcessorConfig, ProcessorError, ProcessorHandle, SyncStats};
pub use protocol::{BlockNumberService, ProtocolError, ProtocolProvider};
pub use registry::{EboMemoryRegistry, EboRegistry};
