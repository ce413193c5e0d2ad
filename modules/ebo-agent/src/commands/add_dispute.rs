use ebo_common::{Dispute, DisputeStatus, EboEvent, EventMetadata};

use super::{require_request, Command, CommandError, CommandState};
use crate::registry::EboRegistry;

/// Registers the dispute observed in a `ResponseDisputed` event and flags
/// the challenged response as disputed.
#[derive(Debug, Clone)]
pub struct AddDispute {
    dispute: Dispute,
    previous_disputed: Option<bool>,
    state: CommandState,
}

impl AddDispute {
    pub const NAME: &'static str = "AddDispute";

    pub fn build_from_event(
        event: &EboEvent,
        registry: &dyn EboRegistry,
    ) -> Result<Self, CommandError> {
        let EventMetadata::ResponseDisputed {
            dispute_id,
            response_id,
            disputer,
            proposer,
        } = &event.metadata
        else {
            return Err(CommandError::UnexpectedEvent {
                command: Self::NAME,
                event: event.name(),
            });
        };

        require_request(registry, &event.request_id)?;

        if registry.get_response(response_id).is_none() {
            return Err(CommandError::ResponseNotFound(response_id.clone()));
        }

        if registry.get_dispute(dispute_id).is_some() {
            return Err(CommandError::AlreadyRegistered {
                kind: "dispute",
                id: dispute_id.to_string(),
            });
        }

        Ok(Self {
            dispute: Dispute {
                id: dispute_id.clone(),
                status: DisputeStatus::Active,
                created_at: event.provenance(),
                request_id: event.request_id.clone(),
                response_id: response_id.clone(),
                disputer: disputer.clone(),
                proposer: proposer.clone(),
            },
            previous_disputed: None,
            state: CommandState::Pending,
        })
    }
}

impl Command for AddDispute {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> CommandState {
        self.state
    }

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_pending(Self::NAME)?;
        let previous = registry
            .set_response_disputed(&self.dispute.response_id, true)
            .ok_or_else(|| CommandError::ResponseNotFound(self.dispute.response_id.clone()))?;
        registry.add_dispute(self.dispute.clone());
        self.previous_disputed = Some(previous);
        self.state = CommandState::Applied;
        Ok(())
    }

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_applied(Self::NAME)?;
        registry.remove_dispute(&self.dispute.id);
        if let Some(previous) = self.previous_disputed {
            registry.set_response_disputed(&self.dispute.response_id, previous);
        }
        Ok(())
    }
}
