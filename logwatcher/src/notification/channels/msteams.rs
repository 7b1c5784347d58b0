//! Microsoft Teams incoming webhook channel (legacy MessageCard format).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    NotificationChannel, collect_recipient_results, default_timeout_secs, send_with_rate_limit,
};
use crate::Result;
use crate::notification::alert::Alert;

/// Teams channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsTeamsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Incoming webhook URLs, one per Teams channel.
    #[serde(default)]
    pub webhooks: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MsTeamsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhooks: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl MsTeamsConfig {
    pub(crate) fn problems(&self) -> Vec<String> {
        if self.webhooks.is_empty() {
            vec!["notifications.msteams: at least one webhook is required".to_string()]
        } else {
            Vec::new()
        }
    }
}

pub struct MsTeamsChannel {
    config: MsTeamsConfig,
    client: Client,
}

impl MsTeamsChannel {
    pub fn new(config: MsTeamsConfig) -> Result<Self> {
        let client = crate::utils::http_client::build_client(
            "msteams",
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self { config, client })
    }

    fn build_payload(alert: &Alert) -> serde_json::Value {
        // Teams renders `text` as markdown; a single newline would be folded away.
        let text = alert.body.replace('\n', "\n\n");
        json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "summary": alert.subject,
            "themeColor": "e74c3c",
            "title": alert.subject,
            "text": text,
        })
    }
}

#[async_trait]
impl NotificationChannel for MsTeamsChannel {
    fn channel_type(&self) -> &'static str {
        "msteams"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.webhooks.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let payload = Self::build_payload(alert);

        let mut results = Vec::with_capacity(self.config.webhooks.len());
        for (index, webhook) in self.config.webhooks.iter().enumerate() {
            let result = send_with_rate_limit("msteams", || self.client.post(webhook).json(&payload))
                .await
                .map(|_| ());
            // Webhook URLs embed secrets, so failures name the webhook by position.
            results.push((format!("webhook #{}", index + 1), result));
        }
        collect_recipient_results("msteams", results)?;

        debug!("Teams notification sent: {}", alert.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels::test_server;

    #[test]
    fn test_build_payload() {
        let payload = MsTeamsChannel::build_payload(&Alert::new("subject", "line one\nline two"));
        assert_eq!(payload["@type"], "MessageCard");
        assert_eq!(payload["title"], "subject");
        assert_eq!(payload["text"], "line one\n\nline two");
    }

    #[tokio::test]
    async fn test_posts_to_every_webhook() {
        let server = test_server::spawn(vec![(200, "1")]).await;
        let channel = MsTeamsChannel::new(MsTeamsConfig {
            enabled: true,
            webhooks: vec![
                format!("{}/hook/a", server.url),
                format!("{}/hook/b", server.url),
            ],
            ..Default::default()
        })
        .unwrap();

        channel.send(&Alert::new("s", "b")).await.unwrap();

        let paths: Vec<_> = server.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/hook/a", "/hook/b"]);
    }

    #[tokio::test]
    async fn test_failed_webhook_is_named_by_position() {
        let server = test_server::spawn(vec![(200, "1"), (500, "boom")]).await;
        let channel = MsTeamsChannel::new(MsTeamsConfig {
            enabled: true,
            webhooks: vec![format!("{}/a", server.url), format!("{}/b", server.url)],
            ..Default::default()
        })
        .unwrap();

        let err = channel.send(&Alert::new("s", "b")).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("webhook #2"));
        assert!(!text.contains("webhook #1"));
    }
}
