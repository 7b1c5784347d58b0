//! Application-wide error types.

use std::fmt;

use tail_source::SourceError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error:\n{}", join_lines(.0))]
    Configuration(Vec<String>),

    #[error("Source {source_id} failed: {error}")]
    Source {
        source_id: String,
        #[source]
        error: SourceError,
    },

    #[error("Delivery failed: {}", join_failures(.0))]
    Delivery(Vec<ChannelFailure>),

    #[error("Giving up on alert \"{subject}\" after {attempts} attempts: {last_error}")]
    DeliveryExhausted {
        subject: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{channel} error: {message}")]
    Channel {
        channel: &'static str,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Alert queue closed")]
    QueueClosed,

    #[error("No watch source left running, {failed} stopped with errors")]
    SourcesExhausted { failed: usize },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(vec![msg.into()])
    }

    pub fn channel(channel: &'static str, message: impl Into<String>) -> Self {
        Self::Channel {
            channel,
            message: message.into(),
        }
    }

    /// Whether this error is the expected result of a shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A single provider failure inside a fan-out delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel: String,
    pub message: String,
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.channel, self.message)
    }
}

fn join_lines(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_failures(failures: &[ChannelFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_lists_every_problem() {
        let err = Error::Configuration(vec![
            "files[0]: filename must not be empty".to_string(),
            "retry.max_attempts must be at least 1".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("  - files[0]: filename must not be empty"));
        assert!(text.contains("  - retry.max_attempts must be at least 1"));
    }

    #[test]
    fn test_delivery_lists_every_channel() {
        let err = Error::Delivery(vec![
            ChannelFailure {
                channel: "telegram".to_string(),
                message: "401".to_string(),
            },
            ChannelFailure {
                channel: "email".to_string(),
                message: "connection refused".to_string(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Delivery failed: telegram: 401; email: connection refused"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::QueueClosed.is_cancelled());
    }
}
