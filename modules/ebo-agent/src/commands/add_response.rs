use ebo_common::{EboEvent, EventMetadata, Response};

use super::{require_request, Command, CommandError, CommandState};
use crate::registry::EboRegistry;

/// Registers the response observed in a `ResponseProposed` event.
#[derive(Debug, Clone)]
pub struct AddResponse {
    response: Response,
    state: CommandState,
}

impl AddResponse {
    pub const NAME: &'static str = "AddResponse";

    pub fn build_from_event(
        event: &EboEvent,
        registry: &dyn EboRegistry,
    ) -> Result<Self, CommandError> {
        let EventMetadata::ResponseProposed {
            response_id,
            proposer,
            body,
            prophet_data,
        } = &event.metadata
        else {
            return Err(CommandError::UnexpectedEvent {
                command: Self::NAME,
                event: event.name(),
            });
        };

        require_request(registry, &event.request_id)?;

        if registry.get_response(response_id).is_some() {
            return Err(CommandError::AlreadyRegistered {
                kind: "response",
                id: response_id.to_string(),
            });
        }

        Ok(Self {
            response: Response {
                id: response_id.clone(),
                request_id: event.request_id.clone(),
                proposer: proposer.clone(),
                created_at: event.provenance(),
                body: *body,
                prophet_data: prophet_data.clone(),
                disputed: false,
            },
            state: CommandState::Pending,
        })
    }
}

impl Command for AddResponse {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> CommandState {
        self.state
    }

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_pending(Self::NAME)?;
        registry.add_response(self.response.clone());
        self.state = CommandState::Applied;
        Ok(())
    }

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_applied(Self::NAME)?;
        registry.remove_response(&self.response.id);
        Ok(())
    }
}
