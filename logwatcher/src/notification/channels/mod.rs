//! Notification channels.
//!
//! This module provides the providers an alert can be delivered through:
//! - Telegram Bot API
//! - Discord REST API (bot or OAuth2 token)
//! - Email (SMTP)
//! - SendGrid mail API
//! - Microsoft Teams incoming webhooks
//! - Generic webhooks (HTTP POST/PUT)

mod discord;
mod email;
mod msteams;
mod sendgrid;
mod telegram;
mod webhook;

pub use discord::{DiscordChannel, DiscordConfig};
pub use email::{EmailChannel, EmailConfig, TlsMode};
pub use msteams::{MsTeamsChannel, MsTeamsConfig};
pub use sendgrid::{SendGridChannel, SendGridConfig};
pub use telegram::{TelegramChannel, TelegramConfig};
pub use webhook::{WebhookAuth, WebhookChannel, WebhookConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::alert::Alert;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest a provider-requested rate limit wait is honoured.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Whether the channel is enabled and has everything it needs to deliver.
    fn is_enabled(&self) -> bool;

    /// Deliver an alert to every recipient of this channel.
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Provider section of the configuration file. One record per provider type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sendgrid: SendGridConfig,
    #[serde(default)]
    pub msteams: MsTeamsConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl NotificationsConfig {
    /// All provider configurations as tagged variants.
    pub fn channels(&self) -> Vec<ChannelConfig> {
        vec![
            ChannelConfig::Telegram(self.telegram.clone()),
            ChannelConfig::Discord(self.discord.clone()),
            ChannelConfig::Email(self.email.clone()),
            ChannelConfig::SendGrid(self.sendgrid.clone()),
            ChannelConfig::MsTeams(self.msteams.clone()),
            ChannelConfig::Webhook(self.webhook.clone()),
        ]
    }
}

/// Channel configuration wrapper.
#[derive(Debug, Clone)]
pub enum ChannelConfig {
    Telegram(TelegramConfig),
    Discord(DiscordConfig),
    Email(EmailConfig),
    SendGrid(SendGridConfig),
    MsTeams(MsTeamsConfig),
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Telegram(_) => "telegram",
            Self::Discord(_) => "discord",
            Self::Email(_) => "email",
            Self::SendGrid(_) => "sendgrid",
            Self::MsTeams(_) => "msteams",
            Self::Webhook(_) => "webhook",
        }
    }

    /// Whether the operator switched the channel on.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Telegram(c) => c.enabled,
            Self::Discord(c) => c.enabled,
            Self::Email(c) => c.enabled,
            Self::SendGrid(c) => c.enabled,
            Self::MsTeams(c) => c.enabled,
            Self::Webhook(c) => c.enabled,
        }
    }

    /// Missing credentials or recipients of an enabled channel.
    pub fn problems(&self) -> Vec<String> {
        if !self.is_enabled() {
            return Vec::new();
        }
        match self {
            Self::Telegram(c) => c.problems(),
            Self::Discord(c) => c.problems(),
            Self::Email(c) => c.problems(),
            Self::SendGrid(c) => c.problems(),
            Self::MsTeams(c) => c.problems(),
            Self::Webhook(c) => c.problems(),
        }
    }

    /// Construct the runtime channel.
    pub fn build(&self) -> Result<Arc<dyn NotificationChannel>> {
        Ok(match self {
            Self::Telegram(c) => Arc::new(TelegramChannel::new(c.clone())?),
            Self::Discord(c) => Arc::new(DiscordChannel::new(c.clone())?),
            Self::Email(c) => Arc::new(EmailChannel::new(c.clone())?),
            Self::SendGrid(c) => Arc::new(SendGridChannel::new(c.clone())?),
            Self::MsTeams(c) => Arc::new(MsTeamsChannel::new(c.clone())?),
            Self::Webhook(c) => Arc::new(WebhookChannel::new(c.clone())?),
        })
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Truncate a message to fit within a provider's character limit.
pub(crate) fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}

/// Collapse per-recipient results into one channel result.
///
/// Every recipient has already been attempted; any failure fails the channel.
pub(crate) fn collect_recipient_results(
    channel: &'static str,
    results: Vec<(String, Result<()>)>,
) -> Result<()> {
    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|(recipient, result)| {
            result.err().map(|e| match e {
                Error::Channel { message, .. } => format!("{recipient}: {message}"),
                other => format!("{recipient}: {other}"),
            })
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::channel(channel, failures.join(", ")))
    }
}

/// Send a request, retrying on 429 responses while respecting the provider's wait hint.
pub(crate) async fn send_with_rate_limit<F>(channel: &'static str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let response = build()
            .send()
            .await
            .map_err(|e| Error::channel(channel, format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            if attempts >= MAX_RATE_LIMIT_RETRIES {
                warn!(
                    "{} rate limit: max retries ({}) exceeded",
                    channel, MAX_RATE_LIMIT_RETRIES
                );
                return Err(Error::channel(
                    channel,
                    format!("rate limit exceeded after {MAX_RATE_LIMIT_RETRIES} retries"),
                ));
            }

            let wait = retry_after(response)
                .await
                .unwrap_or(Duration::from_secs(1))
                .min(MAX_RATE_LIMIT_WAIT);
            debug!(
                "{} rate limited (429), waiting {:?} before retry (attempt {}/{})",
                channel, wait, attempts, MAX_RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(wait).await;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        warn!("{} request failed: {} - {}", channel, status, body);
        return Err(Error::channel(channel, format!("{status} - {body}")));
    }
}

/// Parse the wait hint of a 429 response.
///
/// Headers are preferred; Telegram and Discord also put it in the JSON body.
async fn retry_after(response: Response) -> Option<Duration> {
    for header in ["Retry-After", "X-RateLimit-Reset-After"] {
        if let Some(secs) = response
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
        {
            return Some(Duration::from_secs_f64(secs.max(0.0)));
        }
    }

    let body: serde_json::Value = response.json().await.ok()?;
    body.get("parameters")
        .and_then(|p| p.get("retry_after"))
        .or_else(|| body.get("retry_after"))
        .and_then(|v| v.as_f64())
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("hello", 100), "hello");

        let long: String = "a".repeat(5000);
        let truncated = truncate_message(&long, 4096);
        assert!(truncated.chars().count() <= 4096);
        assert!(truncated.ends_with("[truncated]"));
    }

    #[test]
    fn test_collect_recipient_results() {
        assert!(collect_recipient_results("telegram", vec![("1".into(), Ok(()))]).is_ok());

        let err = collect_recipient_results(
            "telegram",
            vec![
                ("1".into(), Ok(())),
                ("2".into(), Err(Error::Other("blocked".into()))),
            ],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "telegram error: 2: blocked");
    }

    #[test]
    fn test_disabled_channels_have_no_problems() {
        for channel in NotificationsConfig::default().channels() {
            assert!(!channel.is_enabled());
            assert!(channel.problems().is_empty(), "{}", channel.channel_type());
        }
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = test_server::spawn(vec![
            (429, r#"{"parameters":{"retry_after":0}}"#),
            (200, r#"{"ok":true}"#),
        ])
        .await;
        let client = crate::utils::http_client::build_client("test", Duration::from_secs(5)).unwrap();
        let url = format!("{}/hook", server.url);

        send_with_rate_limit("test", || client.post(&url).json(&serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_is_reported_with_body() {
        let server = test_server::spawn(vec![(400, r#"{"description":"chat not found"}"#)]).await;
        let client = crate::utils::http_client::build_client("test", Duration::from_secs(5)).unwrap();
        let url = format!("{}/hook", server.url);

        let err = send_with_rate_limit("test", || client.post(&url))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("chat not found"));
    }
}
