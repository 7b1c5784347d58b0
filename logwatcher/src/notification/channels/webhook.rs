//! Generic webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{NotificationChannel, default_timeout_secs, send_with_rate_limit};
use crate::notification::alert::Alert;
use crate::{Error, Result};

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Whether the channel is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Webhook URL.
    #[serde(default)]
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            method: default_method(),
            headers: Vec::new(),
            auth: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl WebhookConfig {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match url::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => problems.push(format!(
                "notifications.webhook: unsupported url scheme {:?}",
                url.scheme()
            )),
            Err(e) => problems.push(format!(
                "notifications.webhook: invalid url {:?}: {e}",
                self.url
            )),
        }
        if self.parsed_method().is_none() {
            problems.push(format!(
                "notifications.webhook: method must be POST or PUT, got {:?}",
                self.method
            ));
        }
        for (name, value) in &self.headers {
            if name.parse::<HeaderName>().is_err() || value.parse::<HeaderValue>().is_err() {
                problems.push(format!("notifications.webhook: invalid header {name:?}"));
            }
        }
        problems
    }

    fn parsed_method(&self) -> Option<Method> {
        match self.method.to_uppercase().as_str() {
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            _ => None,
        }
    }
}

/// Generic webhook notification channel.
pub struct WebhookChannel {
    config: WebhookConfig,
    method: Method,
    headers: HeaderMap,
    client: Client,
}

impl WebhookChannel {
    /// Create a new Webhook channel.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = crate::utils::http_client::build_client(
            "webhook",
            Duration::from_secs(config.timeout_secs),
        )?;
        let method = config.parsed_method().ok_or_else(|| {
            Error::channel("webhook", format!("unsupported method {}", config.method))
        })?;
        let headers = build_headers(&config);
        Ok(Self {
            config,
            method,
            headers,
            client,
        })
    }

    /// Build the JSON payload.
    fn build_payload(alert: &Alert) -> serde_json::Value {
        json!({
            "subject": alert.subject,
            "body": alert.body,
            "source": alert.source,
            "pattern": alert.pattern,
            "timestamp": alert.timestamp.to_rfc3339(),
        })
    }
}

/// Custom headers plus the auth header, if any.
fn build_headers(config: &WebhookConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &config.headers {
        match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Ignoring invalid webhook header {:?}", name),
        }
    }

    match &config.auth {
        Some(WebhookAuth::Bearer { token }) => {
            if let Ok(value) = format!("Bearer {token}").parse() {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        Some(WebhookAuth::Header { name, value }) => {
            if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
            {
                headers.insert(name, value);
            }
        }
        // Basic auth is applied on the request builder.
        Some(WebhookAuth::Basic { .. }) | None => {}
    }

    headers
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let payload = Self::build_payload(alert);

        send_with_rate_limit("webhook", || {
            let mut request = self
                .client
                .request(self.method.clone(), &self.config.url)
                .headers(self.headers.clone())
                .json(&payload);
            if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
                request = request.basic_auth(username, Some(password));
            }
            request
        })
        .await?;

        debug!("Webhook notification sent: {}", alert.subject);
        Ok(())
    }
}
