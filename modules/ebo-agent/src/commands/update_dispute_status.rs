use ebo_common::{DisputeId, DisputeStatus, EboEvent, EventMetadata};

use super::{Command, CommandError, CommandState};
use crate::registry::EboRegistry;

/// Applies a dispute status change from `DisputeStatusUpdated` or
/// `DisputeEscalated`.
#[derive(Debug, Clone)]
pub struct UpdateDisputeStatus {
    dispute_id: DisputeId,
    status: DisputeStatus,
    previous_status: DisputeStatus,
    state: CommandState,
}

impl UpdateDisputeStatus {
    pub const NAME: &'static str = "UpdateDisputeStatus";

    pub fn build_from_event(
        event: &EboEvent,
        registry: &dyn EboRegistry,
    ) -> Result<Self, CommandError> {
        let (dispute_id, status) = match &event.metadata {
            EventMetadata::DisputeStatusUpdated { dispute_id, status } => (
                dispute_id,
                DisputeStatus::from_code(*status)
                    .map_err(|_| CommandError::UnknownDisputeStatus(*status))?,
            ),
            EventMetadata::DisputeEscalated { dispute_id, .. } => {
                (dispute_id, DisputeStatus::Escalated)
            }
            _ => {
                return Err(CommandError::UnexpectedEvent {
                    command: Self::NAME,
                    event: event.name(),
                })
            }
        };

        let dispute = registry
            .get_dispute(dispute_id)
            .ok_or_else(|| CommandError::DisputeNotFound(dispute_id.clone()))?;

        Ok(Self {
            dispute_id: dispute_id.clone(),
            status,
            previous_status: dispute.status,
            state: CommandState::Pending,
        })
    }

    pub fn status(&self) -> DisputeStatus {
        self.status
    }

    /// The dispute already has the target status.
    pub fn is_redundant(&self) -> bool {
        self.status == self.previous_status
    }
}

impl Command for UpdateDisputeStatus {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> CommandState {
        self.state
    }

    fn run(&mut self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_pending(Self::NAME)?;
        self.previous_status = registry
            .update_dispute_status(&self.dispute_id, self.status)
            .ok_or_else(|| CommandError::DisputeNotFound(self.dispute_id.clone()))?;
        self.state = CommandState::Applied;
        Ok(())
    }

    fn undo(self, registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_applied(Self::NAME)?;
        registry.update_dispute_status(&self.dispute_id, self.previous_status);
        Ok(())
    }
}
