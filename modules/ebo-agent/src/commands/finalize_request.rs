use ebo_common::{EboEvent, EventMetadata, RequestId, RequestStatus};

use super::{require_request, Command, CommandError, CommandState};
use crate::registry::EboRegistry;

/// Marks the request finalized after a `RequestFinalized` event.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    request_id: RequestId,
    previous_status: Option<RequestStatus>,
    state: CommandState,
}

impl FinalizeRequest {
    pub const NAME: &'static str = "FinalizeRequest";

    pub fn build_from_event(
        event: &EboEvent,
        registry: &dyn EboRegistry,
    ) -> Result<Self, CommandError> {
        if !matches!(event.metadata, EventMetadata::RequestFinalized { .. }) {
            return Err(CommandError::UnexpectedEvent {
                command: Self::NAME,
                event: event.name(),
            });
        }

        require_request(registry, &event.request_id)?;

        Ok(Self {
            request_id: event.request_id.clone(),
            previous_status: None,
            state: CommandState::Pending,
        })
    }
}

impl Command for FinalizeRequest {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> CommandState {
        self.state
    }

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_pending(Self::NAME)?;
        let previous = registry
            .update_request_status(&self.request_id, RequestStatus::Finalized)
            .ok_or_else(|| CommandError::RequestNotFound(self.request_id.clone()))?;
        self.previous_status = Some(previous);
        self.state = CommandState::Applied;
        Ok(())
    }

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_applied(Self::NAME)?;
        if let Some(previous) = self.previous_status {
            registry.update_request_status(&self.request_id, previous);
        }
        Ok(())
    }
}
