//! Watch sources and line matching.

pub mod matcher;
pub mod spec;
pub mod task;

pub use matcher::{alerts_for, is_excluded, match_line};
pub use spec::{SourceKind, WatchSpec};
pub use task::{SourceOutcome, run_source};
