//! Single consumer of the alert queue.
//!
//! Alerts are delivered strictly one after another. A failed delivery is
//! retried after a fixed interval until the retry policy is used up; the
//! wait between attempts ends early when the cancellation token fires, in
//! which case the alert is abandoned and the dispatcher stops.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::alert::Alert;
use super::fanout::Notifier;
use super::queue::AlertReceiver;
use crate::Error;
use crate::services::ErrorReporter;

/// How often and how far apart deliveries are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts per alert, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait between two attempts.
    #[serde(default = "default_interval", with = "crate::config::duration")]
    pub interval: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval: default_interval(),
        }
    }
}

/// Counters collected over a dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Alerts taken off the queue.
    pub received: u64,
    /// Alerts delivered successfully.
    pub delivered: u64,
    /// Alerts discarded after the last attempt failed.
    pub dropped: u64,
    /// Delivery attempts made.
    pub attempts: u64,
    /// Backoff waits entered.
    pub backoffs: u64,
    /// Alerts given up on because of cancellation.
    pub abandoned: u64,
}

enum Outcome {
    Delivered,
    Exhausted(Error),
    Abandoned,
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    errors: ErrorReporter,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy, errors: ErrorReporter) -> Self {
        Self {
            notifier,
            policy,
            errors,
        }
    }

    /// Consume the queue until it is closed and drained, or until cancellation.
    pub async fn run(self, mut rx: AlertReceiver, token: CancellationToken) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            let alert = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Dispatcher cancelled with {} alert(s) queued", rx.len());
                    break;
                }
                next = rx.recv() => match next {
                    Some(alert) => alert,
                    None => {
                        debug!("Alert queue closed and drained");
                        break;
                    }
                },
            };
            stats.received += 1;

            match self.deliver(&alert, &token, &mut stats).await {
                Outcome::Delivered => stats.delivered += 1,
                Outcome::Exhausted(error) => {
                    stats.dropped += 1;
                    self.errors.report(error).await;
                }
                Outcome::Abandoned => {
                    stats.abandoned += 1;
                    debug!("Abandoned delivery of \"{}\" on shutdown", alert.subject);
                    break;
                }
            }
        }

        stats
    }

    async fn deliver(
        &self,
        alert: &Alert,
        token: &CancellationToken,
        stats: &mut DispatchStats,
    ) -> Outcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            stats.attempts += 1;
            debug!(
                "Delivering \"{}\" (attempt {}/{})",
                alert.subject, attempt, max_attempts
            );

            let error = match self.notifier.deliver(alert).await {
                Ok(()) => {
                    info!("Alert delivered: {}", alert.subject);
                    return Outcome::Delivered;
                }
                Err(e) => e,
            };
            warn!(
                "Delivery of \"{}\" failed (attempt {}/{}): {}",
                alert.subject, attempt, max_attempts, error
            );

            if attempt >= max_attempts {
                return Outcome::Exhausted(Error::DeliveryExhausted {
                    subject: alert.subject.clone(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            stats.backoffs += 1;
            tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Abandoned,
                _ = sleep(self.policy.interval) => {}
            }
        }
    }
}
