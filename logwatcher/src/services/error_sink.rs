//! Collects the non-fatal errors of every pipeline task and logs them.

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::Error;

/// Counters collected over a sink run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Errors logged as failures.
    pub reported: u64,
    /// Cancellations seen during shutdown.
    pub cancellations: u64,
}

/// Create an error sink buffering at most `capacity` pending reports.
pub fn error_sink(capacity: usize) -> (ErrorReporter, ErrorSink) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ErrorReporter { tx }, ErrorSink { rx })
}

/// Cloneable handle used by tasks to hand errors to the sink.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<Error>,
}

impl ErrorReporter {
    /// Queue an error for logging. If the sink is already gone the error is logged here.
    pub async fn report(&self, error: Error) {
        if let Err(mpsc::error::SendError(error)) = self.tx.send(error).await {
            log_error(&error);
        }
    }
}

/// Consumer half. Runs until every [`ErrorReporter`] has been dropped.
#[derive(Debug)]
pub struct ErrorSink {
    rx: mpsc::Receiver<Error>,
}

impl ErrorSink {
    pub async fn run(mut self) -> SinkStats {
        let mut stats = SinkStats::default();
        while let Some(error) = self.rx.recv().await {
            if log_error(&error) {
                stats.reported += 1;
            } else {
                stats.cancellations += 1;
            }
        }
        stats
    }
}

/// Log one error. Returns `false` for an expected cancellation.
fn log_error(err: &Error) -> bool {
    match err {
        Error::Cancelled => {
            debug!("Task stopped by shutdown");
            return false;
        }
        Error::Source { source_id, error } => {
            error!(source = %source_id, error = %error, "Watch source stopped");
        }
        Error::DeliveryExhausted {
            subject,
            attempts,
            last_error,
        } => {
            error!(
                subject = %subject,
                attempts = *attempts,
                last_error = %last_error,
                "Alert dropped after exhausting delivery attempts"
            );
        }
        other => error!(error = %other, "Pipeline error"),
    }
    true
}
