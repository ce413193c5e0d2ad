//! Reversible registry mutations, one per observed chain event.
//!
//! A command is built from an event and the registry it will mutate, run
//! exactly once, and optionally undone. `undo` consumes the command: it cannot
//! be run again afterwards.

mod add_dispute;
mod add_request;
mod add_response;
mod finalize_request;
mod noop;
mod update_dispute_status;

pub use add_dispute::AddDispute;
pub use add_request::AddRequest;
pub use add_response::AddResponse;
pub use finalize_request::FinalizeRequest;
pub use noop::Noop;
pub use update_dispute_status::UpdateDisputeStatus;

use thiserror::Error;

use ebo_common::{DisputeId, EboEvent, EventMetadata, RequestId, ResponseId};

use crate::registry::EboRegistry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command} was already run")]
    CommandAlreadyRun { command: &'static str },

    #[error("{command} was not run")]
    CommandNotRun { command: &'static str },

    #[error("request {0} not found in registry")]
    RequestNotFound(RequestId),

    #[error("response {0} not found in registry")]
    ResponseNotFound(ResponseId),

    #[error("dispute {0} not found in registry")]
    DisputeNotFound(DisputeId),

    #[error("{kind} {id} is already registered")]
    AlreadyRegistered { kind: &'static str, id: String },

    #[error("unknown dispute status code {0}")]
    UnknownDisputeStatus(u8),

    #[error("{command} cannot be built from a {event} event")]
    UnexpectedEvent {
        command: &'static str,
        event: &'static str,
    },
}

/// Whether a command has mutated the registry yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Applied,
}

impl CommandState {
    fn ensure_pending(&self, command: &'static str) -> Result<(), CommandError> {
        match self {
            Self::Pending => Ok(()),
            Self::Applied => Err(CommandError::CommandAlreadyRun { command }),
        }
    }

    fn ensure_applied(&self, command: &'static str) -> Result<(), CommandError> {
        match self {
            Self::Applied => Ok(()),
            Self::Pending => Err(CommandError::CommandNotRun { command }),
        }
    }
}

pub trait Command: Sized {
    fn name(&self) -> &'static str;

    fn state(&self) -> CommandState;

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError>;

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError>;
}

/// The command matching an event kind.
#[derive(Debug, Clone)]
pub enum RegistryCommand {
    AddRequest(AddRequest),
    AddResponse(AddResponse),
    AddDispute(AddDispute),
    FinalizeRequest(FinalizeRequest),
    UpdateDisputeStatus(UpdateDisputeStatus),
    Noop(Noop),
}

impl RegistryCommand {
    pub fn build_from_event(
        event: &EboEvent,
        registry: &dyn EboRegistry,
    ) -> Result<Self, CommandError> {
        let command = match &event.metadata {
            EventMetadata::RequestCreated { .. } => {
                Self::AddRequest(AddRequest::build_from_event(event, registry)?)
            }
            EventMetadata::ResponseProposed { .. } => {
                Self::AddResponse(AddResponse::build_from_event(event, registry)?)
            }
            EventMetadata::ResponseDisputed { .. } => {
                Self::AddDispute(AddDispute::build_from_event(event, registry)?)
            }
            EventMetadata::RequestFinalized { .. } => {
                Self::FinalizeRequest(FinalizeRequest::build_from_event(event, registry)?)
            }
            EventMetadata::DisputeStatusUpdated { .. } | EventMetadata::DisputeEscalated { .. } => {
                let update = UpdateDisputeStatus::build_from_event(event, registry)?;
                if update.is_redundant() {
                    Self::Noop(Noop::new())
                } else {
                    Self::UpdateDisputeStatus(update)
                }
            }
        };
        Ok(command)
    }
}

impl Command for RegistryCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::AddRequest(c) => c.name(),
            Self::AddResponse(c) => c.name(),
            Self::AddDispute(c) => c.name(),
            Self::FinalizeRequest(c) => c.name(),
            Self::UpdateDisputeStatus(c) => c.name(),
            Self::Noop(c) => c.name(),
        }
    }

    fn state(&self) -> CommandState {
        match self {
            Self::AddRequest(c) => c.state(),
            Self::AddResponse(c) => c.state(),
            Self::AddDispute(c) => c.state(),
            Self::FinalizeRequest(c) => c.state(),
            Self::UpdateDisputeStatus(c) => c.state(),
            Self::Noop(c) => c.state(),
        }
    }

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        match self {
            Self::AddRequest(c) => c.run(registry),
            Self::AddResponse(c) => c.run(registry),
            Self::AddDispute(c) => c.run(registry),
            Self::FinalizeRequest(c) => c.run(registry),
            Self::UpdateDisputeStatus(c) => c.run(registry),
            Self::Noop(c) => c.run(registry),
        }
    }

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        match self {
            Self::AddRequest(c) => c.undo(registry),
            Self::AddResponse(c) => c.undo(registry),
            Self::AddDispute(c) => c.undo(registry),
            Self::FinalizeRequest(c) => c.undo(registry),
            Self::UpdateDisputeStatus(c) => c.undo(registry),
            Self::Noop(c) => c.undo(registry),
        }
    }
}

fn require_request(registry: &dyn EboRegistry, id: &RequestId) -> Result<(), CommandError> {
    registry
        .get_request(id)
        .map(|_| ())
        .ok_or_else(|| CommandError::RequestNotFound(id.clone()))
}
