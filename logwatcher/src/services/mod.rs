//! Long-running services of the pipeline.

pub mod error_sink;
pub mod orchestrator;
pub mod signal;

pub use error_sink::{ErrorReporter, ErrorSink, SinkStats, error_sink};
pub use orchestrator::{Orchestrator, RunSummary, run};
pub use signal::shutdown_signal;
