//! Configuration file loading and validation.
//!
//! The configuration is a single JSON document. Unknown fields are rejected,
//! every section has defaults, and older layouts (see [`legacy`]) are
//! migrated on load. Validation reports every problem at once.
//!
//! ```json
//! {
//!   "queue_capacity": 10,
//!   "retry": { "max_attempts": 3, "interval": "1s" },
//!   "files": [{ "filename": "/var/log/syslog", "watches": ["ERROR"], "excludes": ["transient"] }],
//!   "systemd": [{ "unit": "sshd.service", "watches": ["Failed password"] }],
//!   "notifications": { "telegram": { "enabled": true, "api_token": "...", "chat_ids": [1] } }
//! }
//! ```

pub mod duration;
mod legacy;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use self::legacy::{LegacyFileWatch, LegacyMail, LegacySystemdWatch};
use crate::notification::channels::NotificationsConfig;
use crate::notification::{DEFAULT_QUEUE_CAPACITY, RetryPolicy};
use crate::watch::WatchSpec;
use crate::{Error, Result};

/// A file to follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileWatchConfig {
    pub filename: String,
    /// Include patterns.
    #[serde(default)]
    pub watches: Vec<String>,
    /// Exclude patterns.
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// A systemd unit to follow through the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemdWatchConfig {
    pub unit: String,
    #[serde(default)]
    pub watches: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Validated application configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub files: Vec<FileWatchConfig>,
    pub systemd: Vec<SystemdWatchConfig>,
    pub notifications: NotificationsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
            files: Vec::new(),
            systemd: Vec::new(),
            notifications: NotificationsConfig::default(),
        }
    }
}

/// The file as written, including sections of older layouts.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
    #[serde(default)]
    retry: Option<RetryPolicy>,
    #[serde(default)]
    files: Vec<FileWatchConfig>,
    #[serde(default)]
    systemd: Vec<SystemdWatchConfig>,
    #[serde(default)]
    notifications: NotificationsConfig,

    #[serde(default)]
    mail: Option<LegacyMail>,
    #[serde(default)]
    file_watches: Vec<LegacyFileWatch>,
    #[serde(default)]
    systemd_watches: Vec<LegacySystemdWatch>,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl RawConfig {
    fn migrate(self) -> AppConfig {
        let mut notifications = self.notifications;
        let mut retry = self.retry;

        if let Some(mail) = self.mail {
            debug!("Migrating legacy mail section");
            let email = &notifications.email;
            if !email.enabled && email.server.is_empty() {
                notifications.email = mail.email_config();
            }
            retry.get_or_insert_with(|| mail.retry_policy());
        }

        let mut files = self.files;
        files.extend(self.file_watches.into_iter().map(FileWatchConfig::from));
        let mut systemd = self.systemd;
        systemd.extend(self.systemd_watches.into_iter().map(SystemdWatchConfig::from));

        AppConfig {
            queue_capacity: self.queue_capacity,
            retry: retry.unwrap_or_default(),
            files,
            systemd,
            notifications,
        }
    }
}

impl AppConfig {
    /// Read, migrate and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("could not read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and migrate without validating.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("could not parse config: {e}")))?;
        Ok(raw.migrate())
    }

    /// Check the whole configuration, collecting every problem.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.queue_capacity == 0 {
            problems.push("queue_capacity must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.files.is_empty() && self.systemd.is_empty() {
            problems.push("nothing to watch: configure at least one file or systemd unit".to_string());
        }

        for (i, file) in self.files.iter().enumerate() {
            let name = format!("files[{i}]");
            if file.filename.trim().is_empty() {
                problems.push(format!("{name}: filename must not be empty"));
            }
            check_patterns(&name, &file.watches, &file.excludes, &mut problems);
        }
        for (i, unit) in self.systemd.iter().enumerate() {
            let name = format!("systemd[{i}]");
            if unit.unit.trim().is_empty() {
                problems.push(format!("{name}: unit must not be empty"));
            }
            check_patterns(&name, &unit.watches, &unit.excludes, &mut problems);
        }

        for channel in self.notifications.channels() {
            problems.extend(channel.problems());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(problems))
        }
    }

    /// One watch spec per configured file and unit.
    pub fn watch_specs(&self) -> Vec<WatchSpec> {
        let files = self.files.iter().map(|f| {
            WatchSpec::file(&f.filename, f.watches.clone(), f.excludes.clone())
        });
        let units = self.systemd.iter().map(|u| {
            WatchSpec::journal(&u.unit, u.watches.clone(), u.excludes.clone())
        });
        files.chain(units).collect()
    }
}

fn check_patterns(name: &str, watches: &[String], excludes: &[String], problems: &mut Vec<String>) {
    if watches.is_empty() {
        problems.push(format!("{name}: watches must not be empty"));
    }
    // An empty pattern is a substring of every line.
    if watches.iter().any(String::is_empty) {
        problems.push(format!("{name}: watches must not contain an empty string"));
    }
    if excludes.iter().any(String::is_empty) {
        problems.push(format!("{name}: excludes must not contain an empty string"));
    }
}
