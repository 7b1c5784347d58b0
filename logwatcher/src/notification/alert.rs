//! The unit of work flowing from watch sources to notification channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A matched, non-excluded line destined for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Short summary, used as message title / email subject.
    pub subject: String,
    /// The matched line.
    pub body: String,
    /// Source the line came from (file path or unit name).
    pub source: String,
    /// Include pattern that matched.
    pub pattern: String,
    /// When the line was observed.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            source: String::new(),
            pattern: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Synthetic alert used to check channel configuration.
    pub fn test() -> Self {
        Self::new(
            "logwatcher test notification",
            "If you can read this, the notification channel is configured correctly.",
        )
    }
}
