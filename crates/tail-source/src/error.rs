//! Source error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unrecoverable failure of a line source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid journal filter for unit {unit}: {message}")]
    InvalidFilter { unit: String, message: String },

    #[error("failed to spawn {program}: {error}")]
    Spawn { program: String, error: io::Error },

    #[error("I/O error on {path}: {error}")]
    Io { path: PathBuf, error: io::Error },
}

impl SourceError {
    /// Classify an I/O error raised while opening `target`.
    pub(crate) fn from_open(target: impl Into<PathBuf>, error: io::Error) -> Self {
        let path = target.into();
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.display().to_string()),
            _ => Self::Io { path, error },
        }
    }

    /// Classify an I/O error raised while spawning `program`.
    pub(crate) fn from_spawn(program: &str, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Spawn {
                program: program.to_string(),
                error,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_errors_are_classified() {
        let err = SourceError::from_open("/var/log/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SourceError::NotFound(ref p) if p == "/var/log/x"));

        let err = SourceError::from_open(
            "/var/log/x",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, SourceError::PermissionDenied(_)));

        let err = SourceError::from_open("/var/log/x", io::Error::other("boom"));
        assert!(matches!(err, SourceError::Io { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_spawn_errors_are_classified() {
        let err = SourceError::from_spawn("journalctl", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.to_string(), "source not found: journalctl");

        let err = SourceError::from_spawn("journalctl", io::Error::other("fork failed"));
        assert!(matches!(err, SourceError::Spawn { .. }));
    }
}
