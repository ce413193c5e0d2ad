use std::sync::Arc;

use tracing::{error, warn};

use super::strategy::{CompensatingAction, StrategyTable};
use crate::notify::{ErrorContext, Notifier};
use crate::protocol::ProtocolError;

/// What the actor must do after a protocol error was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
    pub reenqueue: bool,
    pub terminate: bool,
    pub compensation: Option<CompensatingAction>,
}

impl Directive {
    /// The triggering action failed in a way the caller must see.
    pub fn is_failure(&self) -> bool {
        self.reenqueue || self.terminate
    }
}

pub struct ErrorHandler {
    table: Arc<StrategyTable>,
    notifier: Arc<Notifier>,
}

impl ErrorHandler {
    pub fn new(table: Arc<StrategyTable>, notifier: Arc<Notifier>) -> Self {
        Self { table, notifier }
    }

    pub async fn handle(&self, err: &ProtocolError, context: &ErrorContext) -> Directive {
        let strategy = self.table.lookup(err.name());

        if strategy.should_terminate || strategy.should_reenqueue {
            error!(
                error = %err,
                error_name = err.name(),
                %context,
                reenqueue = strategy.should_reenqueue,
                terminate = strategy.should_terminate,
                "Protocol action failed"
            );
        } else {
            warn!(
                error = %err,
                error_name = err.name(),
                %context,
                compensation = ?strategy.compensation,
                "Protocol action reverted, handled by strategy"
            );
        }

        if strategy.should_notify {
            self.notifier.notify_error(err, context).await;
        }

        Directive {
            reenqueue: strategy.should_reenqueue,
            terminate: strategy.should_terminate,
            compensation: strategy.compensation,
        }
    }
}
