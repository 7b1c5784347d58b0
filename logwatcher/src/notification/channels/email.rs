//! Email notification channel using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::NotificationChannel;
use crate::notification::alert::Alert;
use crate::{Error, Result};

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS; the upgrade is mandatory.
    #[default]
    StartTls,
    /// STARTTLS when the server offers it, plain otherwise.
    Opportunistic,
    /// Implicit TLS from the first byte (usually port 465).
    Tls,
    /// No encryption.
    None,
}

/// Email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    /// Whether the channel is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Sender email address.
    #[serde(default)]
    pub sender: String,
    /// Display name of the sender.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// SMTP server host.
    #[serde(default)]
    pub server: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// SMTP username. Authentication is only used when both username and password are set.
    #[serde(default)]
    pub username: String,
    /// SMTP password.
    #[serde(default)]
    pub password: String,
    /// Recipient email addresses.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub tls: TlsMode,
    /// Accept invalid server certificates.
    #[serde(default)]
    pub skip_tls_verify: bool,
    /// Connection and command timeout.
    #[serde(default = "default_timeout", with = "crate::config::duration")]
    pub timeout: Duration,
}

fn default_port() -> u16 {
    25
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sender: String::new(),
            sender_name: None,
            server: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            recipients: Vec::new(),
            tls: TlsMode::default(),
            skip_tls_verify: false,
            timeout: default_timeout(),
        }
    }
}

impl EmailConfig {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.server.trim().is_empty() {
            problems.push("notifications.email: server is required".to_string());
        }
        if let Err(e) = self.sender.parse::<Address>() {
            problems.push(format!(
                "notifications.email: invalid sender {:?}: {e}",
                self.sender
            ));
        }
        if self.recipients.is_empty() {
            problems.push("notifications.email: at least one recipient is required".to_string());
        }
        for recipient in &self.recipients {
            if let Err(e) = recipient.parse::<Address>() {
                problems.push(format!(
                    "notifications.email: invalid recipient {recipient:?}: {e}"
                ));
            }
        }
        problems
    }

    fn sender_mailbox(&self) -> Result<Mailbox> {
        let address = self
            .sender
            .parse::<Address>()
            .map_err(|e| Error::channel("email", format!("invalid sender: {e}")))?;
        let name = self.sender_name.clone().filter(|n| !n.is_empty());
        Ok(Mailbox::new(name, address))
    }

    fn tls(&self) -> Result<Tls> {
        let parameters = || {
            TlsParameters::builder(self.server.clone())
                .dangerous_accept_invalid_certs(self.skip_tls_verify)
                .build()
                .map_err(|e| Error::channel("email", format!("TLS setup failed: {e}")))
        };
        Ok(match self.tls {
            TlsMode::StartTls => Tls::Required(parameters()?),
            TlsMode::Opportunistic => Tls::Opportunistic(parameters()?),
            TlsMode::Tls => Tls::Wrapper(parameters()?),
            TlsMode::None => Tls::None,
        })
    }
}

/// Email notification channel.
pub struct EmailChannel {
    config: EmailConfig,
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    /// Create a new Email channel.
    pub fn new(config: EmailConfig) -> Result<Self> {
        // Disabled channels are still constructible so that `is_enabled` can be asked.
        let from = if config.sender.is_empty() {
            let placeholder = Address::new("logwatcher", "localhost")
                .map_err(|e| Error::channel("email", format!("invalid sender: {e}")))?;
            Mailbox::new(None, placeholder)
        } else {
            config.sender_mailbox()?
        };

        let to = config
            .recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .map_err(|e| Error::channel("email", format!("invalid recipient {r}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
            .port(config.port)
            .timeout(Some(config.timeout))
            .tls(config.tls()?);
        if !config.username.is_empty() && !config.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            config,
            from,
            to,
        })
    }

    fn build_message(&self, alert: &Alert) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(alert.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .body(alert.body.clone())
            .map_err(|e| Error::channel("email", format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
            && !self.config.server.is_empty()
            && !self.config.sender.is_empty()
            && !self.to.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let message = self.build_message(alert)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::channel("email", format!("SMTP delivery failed: {e}")))?;

        debug!(
            "Email notification sent to {} recipient(s): {}",
            self.to.len(),
            alert.subject
        );
        Ok(())
    }
}
