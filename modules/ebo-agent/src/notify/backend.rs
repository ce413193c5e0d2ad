use std::fmt;

use async_trait::async_trait;

use ebo_common::RequestId;

/// Where an error happened, attached to every notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub request_id: Option<RequestId>,
    pub event: Option<&'static str>,
    pub action: String,
}

impl ErrorContext {
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_event(mut self, event: &'static str) -> Self {
        self.event = Some(event);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action={}", self.action)?;
        if let Some(request_id) = &self.request_id {
            write!(f, " request_id={request_id}")?;
        }
        if let Some(event) = self.event {
            write!(f, " event={event}")?;
        }
        Ok(())
    }
}

/// Pluggable notification backend for agent errors.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    async fn notify_error(&self, error: &str, context: &ErrorContext) -> anyhow::Result<()>;
}
