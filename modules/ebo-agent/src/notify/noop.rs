use async_trait::async_trait;

use super::backend::{ErrorContext, NotifyBackend};

/// No-op notification backend, used when no webhook is configured.
pub struct NoopBackend;

#[async_trait]
impl NotifyBackend for NoopBackend {
    async fn notify_error(&self, _error: &str, _context: &ErrorContext) -> anyhow::Result<()> {
        Ok(())
    }
}
