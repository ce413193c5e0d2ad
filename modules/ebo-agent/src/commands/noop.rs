use super::{Command, CommandError, CommandState};
use crate::registry::EboRegistry;

/// For events whose effect the registry already reflects.
#[derive(Debug, Clone)]
pub struct Noop {
    state: CommandState,
}

impl Noop {
    pub const NAME: &'static str = "Noop";

    pub fn new() -> Self {
        Self {
            state: CommandState::Pending,
        }
    }
}

impl Default for Noop {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Noop {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn state(&self) -> CommandState {
        self.state
    }

    fn run(&mut self, _registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_pending(Self::NAME)?;
        self.state = CommandState::Applied;
        Ok(())
    }

    fn undo(self, _registry: &mut dyn EboRegistry) -> Result<(), CommandError> {
        self.state.ensure_applied(Self::NAME)
    }
}
