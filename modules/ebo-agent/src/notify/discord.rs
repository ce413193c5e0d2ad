use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::backend::{ErrorContext, NotifyBackend};

/// Discord has a hard limit of 2000 characters per message.
const MAX_CONTENT_LEN: usize = 2000;

/// Discord incoming webhook notification backend.
pub struct DiscordWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    fn format_message(error: &str, context: &ErrorContext) -> String {
        let mut lines = vec![
            ":rotating_light: **EBO agent error**".to_string(),
            format!("**Action:** {}", context.action),
        ];
        if let Some(request_id) = &context.request_id {
            lines.push(format!("**Request:** `{request_id}`"));
        }
        if let Some(event) = context.event {
            lines.push(format!("**Event:** {event}"));
        }
        lines.push(format!("```\n{error}\n```"));

        let mut content = lines.join("\n");
        if content.len() > MAX_CONTENT_LEN {
            let mut cut = MAX_CONTENT_LEN - 3;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("...");
        }
        content
    }
}

#[async_trait]
impl NotifyBackend for DiscordWebhook {
    async fn notify_error(&self, error: &str, context: &ErrorContext) -> anyhow::Result<()> {
        let payload = json!({
            "content": Self::format_message(error, context),
            "allowed_mentions": { "parse": [] },
        });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Discord webhook returned non-success");
            anyhow::bail!("Discord webhook returned {status}");
        }

        Ok(())
    }
}
