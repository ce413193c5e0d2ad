use tracing::{info, warn};

use ebo_common::AgentConfig;

use super::backend::{ErrorContext, NotifyBackend};
use super::discord::DiscordWebhook;
use super::noop::NoopBackend;

/// Best-effort front for a notification backend. Delivery failures are
/// logged and swallowed.
pub struct Notifier {
    backend: Box<dyn NotifyBackend>,
}

impl Notifier {
    pub fn new(backend: Box<dyn NotifyBackend>) -> Self {
        Self { backend }
    }

    pub fn noop() -> Self {
        Self::new(Box::new(NoopBackend))
    }

    /// Discord if a webhook is configured, otherwise Noop.
    pub fn from_config(config: &AgentConfig) -> Self {
        match &config.discord_webhook_url {
            Some(url) => {
                info!("Discord notifications enabled");
                Self::new(Box::new(DiscordWebhook::new(url.clone())))
            }
            None => {
                info!("No EBO_DISCORD_WEBHOOK_URL set, notifications disabled");
                Self::noop()
            }
        }
    }

    pub async fn notify_error(&self, error: &(dyn std::fmt::Display + Sync), context: &ErrorContext) {
        self.notify_message(&error.to_string(), context).await;
    }

    pub async fn notify_message(&self, error: &str, context: &ErrorContext) {
        if let Err(e) = self.backend.notify_error(error, context).await {
            warn!(error = %e, %context, "Failed to send error notification");
        }
    }
}
