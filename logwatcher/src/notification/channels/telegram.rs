//! Telegram Bot API notification channel.
//!
//! Sends messages via the Telegram Bot API (`POST /bot<token>/sendMessage`),
//! one request per configured chat. Handles 429 rate limits by respecting the
//! `parameters.retry_after` field returned in the JSON response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    NotificationChannel, collect_recipient_results, default_timeout_secs, send_with_rate_limit,
    truncate_message,
};
use crate::Result;
use crate::notification::alert::Alert;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Whether the channel is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Telegram Bot API token.
    #[serde(default)]
    pub api_token: String,
    /// Target chat IDs (users, groups or channels).
    #[serde(default)]
    pub chat_ids: Vec<i64>,
    /// Bot API base URL, for self-hosted Bot API servers.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_token: String::new(),
            chat_ids: Vec::new(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TelegramConfig {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.api_token.trim().is_empty() {
            problems.push("notifications.telegram: api_token is required".to_string());
        }
        if self.chat_ids.is_empty() {
            problems.push("notifications.telegram: at least one chat id is required".to_string());
        }
        problems
    }
}

/// Telegram notification channel.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = crate::utils::http_client::build_client(
            "telegram",
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self { config, client })
    }

    /// Build the message text for an alert.
    fn build_message(alert: &Alert) -> String {
        let text = format!("\u{1f6a8} {}\n\n{}", alert.subject, alert.body);
        truncate_message(&text, TELEGRAM_MESSAGE_LIMIT)
    }

    async fn send_to_chat(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_url.trim_end_matches('/'),
            self.config.api_token
        );
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        send_with_rate_limit("telegram", || self.client.post(&url).json(&payload)).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn channel_type(&self) -> &'static str {
        "telegram"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.api_token.is_empty() && !self.config.chat_ids.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let text = Self::build_message(alert);

        let mut results = Vec::with_capacity(self.config.chat_ids.len());
        for chat_id in &self.config.chat_ids {
            results.push((chat_id.to_string(), self.send_to_chat(*chat_id, &text).await));
        }
        collect_recipient_results("telegram", results)?;

        debug!("Telegram notification sent: {}", alert.subject);
        Ok(())
    }
}
