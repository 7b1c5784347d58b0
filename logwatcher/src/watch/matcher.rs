//! Substring matching of lines against a [`WatchSpec`].
//!
//! Exclusion always wins: a line containing any exclude pattern produces no
//! matches, whatever it includes.

use chrono::Utc;

use super::spec::WatchSpec;
use crate::notification::Alert;

/// Whether any exclude pattern occurs in `line`.
pub fn is_excluded(line: &str, excludes: &[String]) -> bool {
    excludes.iter().any(|exclude| line.contains(exclude.as_str()))
}

/// Include patterns of `spec` found in `line`, in configuration order.
pub fn match_line<'a>(line: &str, spec: &'a WatchSpec) -> Vec<&'a str> {
    if is_excluded(line, &spec.exclude) {
        return Vec::new();
    }
    spec.include
        .iter()
        .map(String::as_str)
        .filter(|pattern| line.contains(pattern))
        .collect()
}

/// One alert per include pattern matched by `line`.
pub fn alerts_for(line: &str, spec: &WatchSpec) -> Vec<Alert> {
    let matches = match_line(line, spec);
    if matches.is_empty() {
        return Vec::new();
    }

    let source = spec.source_id();
    let timestamp = Utc::now();
    matches
        .into_iter()
        .map(|pattern| Alert {
            subject: spec.subject(pattern),
            body: line.to_string(),
            source: source.clone(),
            pattern: pattern.to_string(),
            timestamp,
        })
        .collect()
}
