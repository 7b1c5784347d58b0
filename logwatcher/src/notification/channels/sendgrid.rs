//! SendGrid v3 mail send notification channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{NotificationChannel, default_timeout_secs, send_with_rate_limit};
use crate::Result;
use crate::notification::alert::Alert;

const DEFAULT_API_URL: &str = "https://api.sendgrid.com";

/// SendGrid channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendGridConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub sender_address: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            sender_address: String::new(),
            sender_name: String::new(),
            recipients: Vec::new(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SendGridConfig {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.api_key.trim().is_empty() {
            problems.push("notifications.sendgrid: api_key is required".to_string());
        }
        if self.sender_address.trim().is_empty() {
            problems.push("notifications.sendgrid: sender_address is required".to_string());
        }
        if self.recipients.is_empty() {
            problems.push("notifications.sendgrid: at least one recipient is required".to_string());
        }
        problems
    }
}

/// SendGrid notification channel.
///
/// One API call carries every recipient as a separate personalization, so
/// recipients do not see each other.
pub struct SendGridChannel {
    config: SendGridConfig,
    client: Client,
}

impl SendGridChannel {
    pub fn new(config: SendGridConfig) -> Result<Self> {
        let client = crate::utils::http_client::build_client(
            "sendgrid",
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self { config, client })
    }

    fn build_payload(&self, alert: &Alert) -> serde_json::Value {
        let personalizations: Vec<_> = self
            .config
            .recipients
            .iter()
            .map(|email| json!({ "to": [{ "email": email }] }))
            .collect();

        let mut from = json!({ "email": self.config.sender_address });
        if !self.config.sender_name.is_empty() {
            from["name"] = json!(self.config.sender_name);
        }

        json!({
            "personalizations": personalizations,
            "from": from,
            "subject": alert.subject,
            "content": [{ "type": "text/plain", "value": alert.body }],
        })
    }
}

#[async_trait]
impl NotificationChannel for SendGridChannel {
    fn channel_type(&self) -> &'static str {
        "sendgrid"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
            && !self.config.api_key.is_empty()
            && !self.config.sender_address.is_empty()
            && !self.config.recipients.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let url = format!(
            "{}/v3/mail/send",
            self.config.api_url.trim_end_matches('/')
        );
        let payload = self.build_payload(alert);

        send_with_rate_limit("sendgrid", || {
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&payload)
        })
        .await?;

        debug!("SendGrid notification sent: {}", alert.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels::test_server;

    fn config(api_url: String) -> SendGridConfig {
        SendGridConfig {
            enabled: true,
            api_key: "SG.key".to_string(),
            sender_address: "alerts@example.com".to_string(),
            sender_name: "Log Watcher".to_string(),
            recipients: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            api_url,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_payload() {
        let channel = SendGridChannel::new(config(DEFAULT_API_URL.to_string())).unwrap();
        let payload = channel.build_payload(&Alert::new("subject", "ERROR disk full"));

        assert_eq!(payload["personalizations"].as_array().unwrap().len(), 2);
        assert_eq!(payload["personalizations"][1]["to"][0]["email"], "b@example.com");
        assert_eq!(payload["from"]["name"], "Log Watcher");
        assert_eq!(payload["subject"], "subject");
        assert_eq!(payload["content"][0]["value"], "ERROR disk full");
    }

    #[test]
    fn test_problems() {
        let problems = SendGridConfig {
            enabled: true,
            ..Default::default()
        }
        .problems();
        assert_eq!(problems.len(), 3);
    }

    #[tokio::test]
    async fn test_send_uses_bearer_auth() {
        let server = test_server::spawn(vec![(202, "")]).await;
        let channel = SendGridChannel::new(config(server.url.clone())).unwrap();
        assert!(channel.is_enabled());

        channel.send(&Alert::new("s", "b")).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/v3/mail/send");
        assert_eq!(requests[0].header("authorization"), Some("Bearer SG.key"));
    }
}
