//! Discord notification channel.
//!
//! Posts to `POST /channels/{id}/messages` of the Discord REST API,
//! authenticated with a bot token or, when none is configured, an OAuth2
//! bearer token.
//!
//! Implements Discord's recommended rate limit handling:
//! - No hardcoded rate limits
//! - Retries on 429 responses respecting the Retry-After header

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

/// Discord message content limit.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Discord channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordConfig {
    /// Whether the channel is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Bot token, preferred over the OAuth2 token when both are set.
    #[serde(default)]
    pub bot_token: String,
    /// OAuth2 bearer token.
    #[serde(default)]
    pub oauth_token: String,
    /// Target channel IDs.
    #[serde(default)]
    pub channel_ids: Vec<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            oauth_token: String::new(),
            channel_ids: Vec::new(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DiscordConfig {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.bot_token.trim().is_empty() && self.oauth_token.trim().is_empty() {
            problems.push("notifications.discord: bot_token or oauth_token is required".to_string());
        }
        if self.channel_ids.is_empty() {
            problems.push("notifications.discord: at least one channel id is required".to_string());
        }
        problems
    }

    /// Authorization header value.
    fn authorization(&self) -> Option<String> {
        if !self.bot_token.is_empty() {
            Some(format!("Bot {}", self.bot_token))
        } else if !self.oauth_token.is_empty() {
            Some(format!("Bearer {}", self.oauth_token))
        } else {
            None
        }
    }
}

/// Discord notification channel.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: Client,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    pub fn new(config: DiscordConfig) -> Result<Self> {
        let client = crate::utils::http_client::build_client(
            "discord",
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self { config, client })
    }

    fn build_payload(alert: &Alert) -> serde_json::Value {
        let content = format!("**{}**\n{}", alert.subject, alert.body);
        json!({
            "content": truncate_message(&content, DISCORD_MESSAGE_LIMIT),
            "allowed_mentions": { "parse": [] },
        })
    }

    async fn send_to_channel(&self, channel_id: &str, payload: &serde_json::Value) -> Result<()> {
        let url = format!(
            "{}/channels/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            channel_id
        );
        let authorization = self.config.authorization().unwrap_or_default();

        send_with_rate_limit("discord", || {
            self.client
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, &authorization)
                .json(payload)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn channel_type(&self) -> &'static str {
        "discord"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
            && self.config.authorization().is_some()
            && !self.config.channel_ids.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let payload = Self::build_payload(alert);

        let mut results = Vec::with_capacity(self.config.channel_ids.len());
        for channel_id in &self.config.channel_ids {
            results.push((
                channel_id.clone(),
                self.send_to_channel(channel_id, &payload).await,
            ));
        }
        collect_recipient_results("discord", results)?;

        debug!("Discord notification sent: {}", alert.subject);
        Ok(())
    }
}
