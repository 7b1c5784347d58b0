//! The task driving one watch source.

use std::sync::Arc;

use futures::StreamExt;
use tail_source::LineSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::matcher::alerts_for;
use super::spec::WatchSpec;
use crate::Error;
use crate::notification::AlertSender;
use crate::services::ErrorReporter;

/// How a source task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub source_id: String,
    /// Lines read from the source.
    pub lines: u64,
    /// Alerts handed to the queue.
    pub alerts: u64,
    /// Whether the source stopped because of an error.
    pub failed: bool,
}

/// Follow `source`, match every line against `spec` and queue the alerts.
///
/// A full queue holds this task back, and with it the reading of the source.
/// Source errors and a closed queue are handed to the error sink; the task
/// then ends without affecting any other task.
pub async fn run_source(
    spec: Arc<WatchSpec>,
    source: Arc<dyn LineSource>,
    alerts: AlertSender,
    errors: ErrorReporter,
    token: CancellationToken,
) -> SourceOutcome {
    let source_id = spec.source_id();
    let mut outcome = SourceOutcome {
        source_id: source_id.clone(),
        lines: 0,
        alerts: 0,
        failed: false,
    };

    let mut lines = source.follow(token.clone());

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(error)) => {
                outcome.failed = true;
                errors
                    .report(Error::Source {
                        source_id: source_id.clone(),
                        error,
                    })
                    .await;
                break;
            }
            None => {
                info!("Source ended");
                break;
            }
        };
        outcome.lines += 1;
        debug!("got line: {}", line);

        for alert in alerts_for(&line, &spec) {
            debug!("Match for {:?}: {}", alert.pattern, line);
            match alerts.push(alert, &token).await {
                Ok(()) => outcome.alerts += 1,
                Err(error) => {
                    // Cancelled while waiting for room, or the dispatcher is gone.
                    if !error.is_cancelled() {
                        outcome.failed = true;
                    }
                    errors.report(error).await;
                    return outcome;
                }
            }
        }
    }

    outcome
}
