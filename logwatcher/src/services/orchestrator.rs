//! Wires the watch sources, the dispatcher and the error sink together and
//! manages their lifecycle.
//!
//! Shutdown happens in one of two ways:
//!
//! - The token is cancelled (interrupt). Sources stop at their next wait
//!   point, the dispatcher stops without draining, and `run` returns `Ok`.
//! - Every source ends on its own. Once the last one has been joined the
//!   alert queue closes, the dispatcher delivers what is still queued, and
//!   the token is cancelled. If any source failed, `run` returns
//!   [`Error::SourcesExhausted`].

use std::sync::Arc;

use tail_source::LineSource;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::error_sink::{SinkStats, error_sink};
use crate::config::AppConfig;
use crate::notification::{
    DEFAULT_QUEUE_CAPACITY, DispatchStats, Dispatcher, FanoutNotifier, Notifier, RetryPolicy,
    alert_queue,
};
use crate::watch::{WatchSpec, run_source};
use crate::{Error, Result};

/// Pending error reports buffered before reporters wait for the sink.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Final status of a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Watch sources started.
    pub sources: usize,
    /// Sources that stopped with an error or panicked.
    pub failed_sources: usize,
    pub dispatch: DispatchStats,
    pub sink: SinkStats,
    /// Whether the run ended because the token was cancelled.
    pub interrupted: bool,
}

/// Builder for one pipeline run.
pub struct Orchestrator {
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    queue_capacity: usize,
    sources: Vec<(Arc<WatchSpec>, Arc<dyn LineSource>)>,
}

impl Orchestrator {
    pub fn new(notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self {
            notifier,
            retry,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sources: Vec::new(),
        }
    }

    /// Set up the pipeline described by a validated configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let notifier = Arc::new(FanoutNotifier::from_config(&config.notifications)?);
        let mut orchestrator =
            Self::new(notifier, config.retry).with_queue_capacity(config.queue_capacity);
        for spec in config.watch_specs() {
            let source = spec.build_source();
            orchestrator = orchestrator.watch(spec, source);
        }
        Ok(orchestrator)
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Add a source whose lines are matched against `spec`.
    pub fn watch(mut self, spec: WatchSpec, source: Arc<dyn LineSource>) -> Self {
        self.sources.push((Arc::new(spec), source));
        self
    }

    /// Run until interrupted or until every source has ended.
    pub async fn run(self, token: CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary {
            sources: self.sources.len(),
            ..Default::default()
        };

        let (alerts_tx, alerts_rx) = alert_queue(self.queue_capacity);
        let (reporter, sink) = error_sink(ERROR_CHANNEL_CAPACITY);

        let sink_handle = tokio::spawn(sink.run());
        let dispatcher = Dispatcher::new(self.notifier, self.retry, reporter.clone());
        let dispatcher_handle = tokio::spawn(
            dispatcher
                .run(alerts_rx, token.clone())
                .instrument(info_span!("dispatcher")),
        );

        let mut sources = JoinSet::new();
        for (spec, source) in self.sources {
            let span = info_span!("source", source = %spec.source_id());
            sources.spawn(
                run_source(spec, source, alerts_tx.clone(), reporter.clone(), token.clone())
                    .instrument(span),
            );
        }
        // From here on the queue closes when the last source task ends.
        drop(alerts_tx);
        info!("Watching {} source(s)", summary.sources);

        while let Some(joined) = sources.join_next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.failed {
                        summary.failed_sources += 1;
                    }
                }
                Err(e) => {
                    summary.failed_sources += 1;
                    reporter
                        .report(Error::TaskPanicked(format!("watch source: {e}")))
                        .await;
                }
            }
        }

        summary.interrupted = token.is_cancelled();
        if summary.interrupted {
            info!("Shutdown requested, stopping dispatcher");
        } else {
            info!("All watch sources stopped, delivering queued alerts");
        }

        match dispatcher_handle.await {
            Ok(stats) => summary.dispatch = stats,
            Err(e) => {
                reporter
                    .report(Error::TaskPanicked(format!("dispatcher: {e}")))
                    .await;
            }
        }
        token.cancel();

        // Last reporter; the sink drains and ends once it is gone.
        drop(reporter);
        match sink_handle.await {
            Ok(stats) => summary.sink = stats,
            Err(e) => error!("Error sink task failed: {}", e),
        }

        info!(
            delivered = summary.dispatch.delivered,
            dropped = summary.dispatch.dropped,
            failed_sources = summary.failed_sources,
            "Pipeline stopped"
        );

        if !summary.interrupted && summary.failed_sources > 0 {
            warn!("{} watch source(s) failed", summary.failed_sources);
            return Err(Error::SourcesExhausted {
                failed: summary.failed_sources,
            });
        }
        Ok(summary)
    }
}

/// Run the pipeline described by a validated configuration.
pub async fn run(token: CancellationToken, config: AppConfig) -> Result<RunSummary> {
    Orchestrator::from_config(&config)?.run(token).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tail_source::VecSource;

    use super::*;
    use crate::notification::fanout::testing::ScriptedNotifier;

    fn spec(name: &str) -> WatchSpec {
        WatchSpec::file(name, ["ERROR"], ["transient"])
    }

    #[tokio::test]
    async fn test_one_alert_end_to_end() {
        let notifier = ScriptedNotifier::new([true]);
        let token = CancellationToken::new();
        let source = VecSource::new("app.log", ["ok", "ERROR disk full", "ignore ERROR transient"]);

        let summary = Orchestrator::new(notifier.clone(), RetryPolicy::default())
            .watch(spec("app.log"), Arc::new(source))
            .run(token.clone())
            .await
            .unwrap();

        assert!(!summary.interrupted);
        assert_eq!(summary.sources, 1);
        assert_eq!(summary.dispatch.received, 1);
        assert_eq!(summary.dispatch.delivered, 1);
        let delivered = notifier.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].body, "ERROR disk full");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_source_does_not_stop_the_others() {
        let notifier = ScriptedNotifier::new([true, true]);
        let token = CancellationToken::new();

        let run = tokio::spawn(
            Orchestrator::new(notifier.clone(), RetryPolicy::default())
                .watch(spec("broken.log"), Arc::new(VecSource::new("broken.log", Vec::<String>::new()).failing("broken.log")))
                .watch(
                    spec("app.log"),
                    Arc::new(VecSource::new("app.log", ["ERROR one", "ERROR two"]).held_open()),
                )
                .run(token.clone()),
        );

        while notifier.delivered.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        let summary = run.await.unwrap().unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.failed_sources, 1);
        assert_eq!(summary.dispatch.delivered, 2);
        assert_eq!(summary.sink.reported, 1);
    }

    #[tokio::test]
    async fn test_every_source_failing_is_an_error() {
        let notifier = ScriptedNotifier::new(Vec::<bool>::new());
        let err = Orchestrator::new(notifier, RetryPolicy::default())
            .watch(spec("a"), Arc::new(VecSource::new("a", Vec::<String>::new()).failing("a")))
            .watch(spec("b"), Arc::new(VecSource::new("b", Vec::<String>::new()).failing("b")))
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SourcesExhausted { failed: 2 }));
    }

    #[tokio::test]
    async fn test_interrupt_during_backoff_returns_promptly() {
        let notifier = ScriptedNotifier::new(Vec::<bool>::new());
        let token = CancellationToken::new();
        let retry = RetryPolicy {
            max_attempts: 10,
            interval: Duration::from_secs(3600),
        };

        let run = tokio::spawn(
            Orchestrator::new(notifier.clone(), retry)
                .watch(spec("app.log"), Arc::new(VecSource::new("app.log", ["ERROR x"]).held_open()))
                .run(token.clone()),
        );

        while notifier.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("pipeline did not stop")
            .unwrap()
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.dispatch.abandoned, 1);
        assert_eq!(summary.dispatch.dropped, 0);
        assert_eq!(summary.failed_sources, 0);
    }

    #[tokio::test]
    async fn test_queue_backpressure_holds_the_source() {
        // One slot and a notifier that never succeeds: the source can only
        // get one alert past the one being retried.
        let notifier = ScriptedNotifier::new(Vec::<bool>::new());
        let token = CancellationToken::new();
        let retry = RetryPolicy {
            max_attempts: 100,
            interval: Duration::from_secs(3600),
        };
        let lines: Vec<String> = (0..20).map(|i| format!("ERROR {i}")).collect();

        let run = tokio::spawn(
            Orchestrator::new(notifier.clone(), retry)
                .with_queue_capacity(1)
                .watch(spec("app.log"), Arc::new(VecSource::new("app.log", lines)))
                .run(token.clone()),
        );

        while notifier.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.dispatch.received, 1);
        assert_eq!(notifier.calls(), 1);
        // The producer was still waiting for room when it was cancelled.
        assert_eq!(summary.sink.cancellations, 1);
    }
}
