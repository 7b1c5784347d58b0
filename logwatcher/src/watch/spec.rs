//! What to watch and which patterns to look for.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tail_source::{FileSource, JournalSource, LineSource};

/// Where lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// A regular file, followed across rotation.
    File(PathBuf),
    /// A systemd unit, followed through the journal.
    Journal(String),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Journal(unit) => write!(f, "unit {unit}"),
        }
    }
}

/// One watched source with its include and exclude patterns.
///
/// Patterns are plain, case-sensitive substrings. Duplicates are removed on
/// construction while keeping the first occurrence in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub kind: SourceKind,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl WatchSpec {
    pub fn new(kind: SourceKind, include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            kind,
            include: dedup(include),
            exclude: dedup(exclude),
        }
    }

    pub fn file(
        path: impl Into<PathBuf>,
        include: impl IntoIterator<Item = impl Into<String>>,
        exclude: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(
            SourceKind::File(path.into()),
            include.into_iter().map(Into::into).collect(),
            exclude.into_iter().map(Into::into).collect(),
        )
    }

    pub fn journal(
        unit: impl Into<String>,
        include: impl IntoIterator<Item = impl Into<String>>,
        exclude: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(
            SourceKind::Journal(unit.into()),
            include.into_iter().map(Into::into).collect(),
            exclude.into_iter().map(Into::into).collect(),
        )
    }

    /// File path or unit name.
    pub fn source_id(&self) -> String {
        match &self.kind {
            SourceKind::File(path) => path.display().to_string(),
            SourceKind::Journal(unit) => unit.clone(),
        }
    }

    /// Alert subject for a line of this source matching `pattern`.
    pub fn subject(&self, pattern: &str) -> String {
        format!("{} matched string {}", self.kind, pattern)
    }

    /// The line producer for this source.
    pub fn build_source(&self) -> Arc<dyn LineSource> {
        match &self.kind {
            SourceKind::File(path) => Arc::new(FileSource::new(path)),
            SourceKind::Journal(unit) => Arc::new(JournalSource::new(unit)),
        }
    }
}

fn dedup(patterns: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        if !unique.contains(&pattern) {
            unique.push(pattern);
        }
    }
    unique
}
