pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod telemetry;
pub mod types;

pub use codec::ProphetCodec;
pub use config::AgentConfig;
pub use error::CommonError;
pub use events::{EboEvent, EventKey, EventMetadata};
pub use ids::{Address, ChainId, DisputeId, RequestId, ResponseId};
pub use types::*;
