use std::collections::HashMap;
use std::fmt;

/// Named follow-up action the actor runs when a protocol error asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompensatingAction {
    /// The dispute cannot be settled while pledges are tied: escalate it instead.
    EscalateDispute,
}

impl fmt::Display for CompensatingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EscalateDispute => write!(f, "escalate_dispute"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStrategy {
    pub should_notify: bool,
    pub should_reenqueue: bool,
    pub should_terminate: bool,
    pub compensation: Option<CompensatingAction>,
}

impl ErrorStrategy {
    /// Nothing to do beyond logging.
    pub const IGNORE: Self = Self {
        should_notify: false,
        should_reenqueue: false,
        should_terminate: false,
        compensation: None,
    };

    /// Unknown errors: tell a human and try again later.
    pub const RETRY_AND_NOTIFY: Self = Self {
        should_notify: true,
        should_reenqueue: true,
        should_terminate: false,
        compensation: None,
    };

    pub const TERMINATE: Self = Self {
        should_notify: true,
        should_reenqueue: false,
        should_terminate: true,
        compensation: None,
    };

    pub const fn compensate(action: CompensatingAction) -> Self {
        Self {
            should_notify: false,
            should_reenqueue: false,
            should_terminate: false,
            compensation: Some(action),
        }
    }
}

/// Error name → strategy, with a fallback for names not in the table.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    rules: HashMap<String, ErrorStrategy>,
    fallback: ErrorStrategy,
}

impl StrategyTable {
    pub fn empty(fallback: ErrorStrategy) -> Self {
        Self {
            rules: HashMap::new(),
            fallback,
        }
    }

    pub fn with_rule(mut self, name: impl Into<String>, strategy: ErrorStrategy) -> Self {
        self.rules.insert(name.into(), strategy);
        self
    }

    pub fn lookup(&self, name: &str) -> ErrorStrategy {
        self.rules.get(name).copied().unwrap_or(self.fallback)
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::empty(ErrorStrategy::RETRY_AND_NOTIFY)
            .with_rule(
                "BondEscalationModule_ShouldBeEscalated",
                ErrorStrategy::compensate(CompensatingAction::EscalateDispute),
            )
            .with_rule("BondedResponseModule_AlreadyResponded", ErrorStrategy::IGNORE)
            .with_rule("Oracle_ResponseAlreadyDisputed", ErrorStrategy::IGNORE)
            .with_rule("Oracle_AlreadyFinalized", ErrorStrategy::IGNORE)
            .with_rule("BondEscalationModule_AlreadyPledged", ErrorStrategy::IGNORE)
            .with_rule("Oracle_InvalidRequest", ErrorStrategy::TERMINATE)
            .with_rule(
                "AccountingExtension_InsufficientFunds",
                ErrorStrategy::RETRY_AND_NOTIFY,
            )
    }
}
