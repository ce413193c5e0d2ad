pub mod backend;
pub mod discord;
pub mod noop;
pub mod notifier;

pub use backend::{ErrorContext, NotifyBackend};
pub use notifier::Notifier;
