use ebo_common::{EboEvent, EventMetadata, Request, RequestStatus};

use super::{Command, CommandError, CommandState};
use crate::registry::EboRegistry;

/// Registers the request observed in a `RequestCreated` event.
#[derive(Debug, Clone)]
pub struct AddRequest {
    request: Request,
    state: CommandState,
}

impl AddRequest {
    pub const NAME: &'static str = "AddRequest";

    pub fn build_from_event(
        event: &EboEvent,
        registry: &dyn EboRegistry,
    ) -> Result<Self, CommandError> {
        let EventMetadata::RequestCreated {
            chain_id,
            epoch,
            params,
            prophet_data,
        } = &event.metadata
        else {
            return Err(CommandError::UnexpectedEvent {
                command: Self::NAME,
                event: event.name(),
            });
        };

        if registry.get_request(&event.request_id).is_some() {
            return Err(CommandError::AlreadyRegistered {
                kind: "request",
                id: event.request_id.to_string(),
            });
        }

        Ok(Self {
            request: Request {
                id: event.request_id.clone(),
                chain_id: chain_id.clone(),
                epoch: *epoch,
                created_at: event.provenance(),
                params: *params,
                prophet_data: prophet_data.clone(),
                status: RequestStatus::Active,
            },
            state: CommandState::Pending,
        })
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

impl Command for AddRequest {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> CommandState {
        self.state
    }

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_pending(Self::NAME)?;
        registry.add_request(self.request.clone());
        self.state = CommandState::Applied;
        Ok(())
    }

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_applied(Self::NAME)?;
        registry.remove_request(&self.request.id);
        Ok(())
    }
}
