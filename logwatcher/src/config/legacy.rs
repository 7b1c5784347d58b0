//! Sections of older configuration files.
//!
//! Early versions only knew SMTP and configured it in a top-level `mail`
//! section together with the retry settings. Watches lived in
//! `file_watches` / `systemd_watches` with a single `strings` list.

use std::time::Duration;

use serde::Deserialize;

use super::{FileWatchConfig, SystemdWatchConfig};
use crate::notification::RetryPolicy;
use crate::notification::channels::{EmailConfig, TlsMode};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyMailSender {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mail: String,
}

/// The old top-level `mail` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyMail {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub from: LegacyMailSender,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub skiptls: bool,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_sleep", with = "crate::config::duration")]
    pub sleep: Duration,
    #[serde(default = "default_timeout", with = "crate::config::duration")]
    pub timeout: Duration,
}

fn default_retries() -> u32 {
    3
}

fn default_sleep() -> Duration {
    Duration::from_secs(1)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl LegacyMail {
    pub fn email_config(&self) -> EmailConfig {
        let defaults = EmailConfig::default();
        EmailConfig {
            enabled: !self.server.is_empty(),
            sender: self.from.mail.clone(),
            sender_name: Some(self.from.name.clone()).filter(|n| !n.is_empty()),
            server: self.server.clone(),
            port: if self.port == 0 { defaults.port } else { self.port },
            username: self.user.clone(),
            password: self.password.clone(),
            recipients: self.to.clone(),
            // Old files either asked for implicit TLS or took whatever the server offered.
            tls: if self.tls {
                TlsMode::Tls
            } else {
                TlsMode::Opportunistic
            },
            skip_tls_verify: self.skiptls,
            timeout: self.timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries,
            interval: self.sleep,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyFileWatch {
    pub file: String,
    #[serde(default)]
    pub strings: Vec<String>,
}

impl From<LegacyFileWatch> for FileWatchConfig {
    fn from(watch: LegacyFileWatch) -> Self {
        Self {
            filename: watch.file,
            watches: watch.strings,
            excludes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacySystemdWatch {
    pub unit_file: String,
    #[serde(default)]
    pub strings: Vec<String>,
}

impl From<LegacySystemdWatch> for SystemdWatchConfig {
    fn from(watch: LegacySystemdWatch) -> Self {
        Self {
            unit: watch.unit_file,
            watches: watch.strings,
            excludes: Vec::new(),
        }
    }
}
