//! Delivery of one alert to every configured channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::alert::Alert;
use super::channels::{NotificationChannel, NotificationsConfig};
use crate::error::ChannelFailure;
use crate::{Error, Result};

/// Anything that can deliver an alert. The dispatcher retries on `Err`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Sends each alert to every channel.
///
/// Channels are attempted concurrently and a failure never prevents the
/// remaining channels from being tried. The delivery succeeds only when
/// every channel succeeded; otherwise the error lists each failed channel.
pub struct FanoutNotifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl FanoutNotifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Build the enabled, fully configured channels.
    ///
    /// Channels that are switched off or lack credentials are skipped here,
    /// never at delivery time.
    pub fn from_config(config: &NotificationsConfig) -> Result<Self> {
        let mut channels = Vec::new();

        for channel_config in config.channels() {
            let channel_type = channel_config.channel_type();
            if !channel_config.is_enabled() {
                continue;
            }
            let problems = channel_config.problems();
            if !problems.is_empty() {
                debug!(
                    "Skipping {} channel: {}",
                    channel_type,
                    problems.join(", ")
                );
                continue;
            }

            let channel = channel_config.build()?;
            if !channel.is_enabled() {
                debug!("Skipping {} channel: not fully configured", channel_type);
                continue;
            }
            info!("Notifications: using {}", channel_type);
            channels.push(channel);
        }

        if channels.is_empty() {
            warn!("No notification channel is enabled; matched alerts will only be logged");
        }

        Ok(Self::new(channels))
    }

    /// Types of the active channels, in configuration order.
    pub fn channel_types(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.channel_type()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        if self.channels.is_empty() {
            info!(subject = %alert.subject, body = %alert.body, "Alert (no channel configured)");
            return Ok(());
        }

        let results = join_all(self.channels.iter().map(|channel| async move {
            (channel.channel_type(), channel.send(alert).await)
        }))
        .await;

        let failures: Vec<ChannelFailure> = results
            .into_iter()
            .filter_map(|(channel, result)| {
                result.err().map(|e| ChannelFailure {
                    channel: channel.to_string(),
                    message: match e {
                        Error::Channel { message, .. } => message,
                        other => other.to_string(),
                    },
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Delivery(failures))
        }
    }
}
