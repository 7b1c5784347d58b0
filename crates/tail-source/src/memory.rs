//! In-memory line source for tests.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{LINE_CHANNEL_CAPACITY, LineSource, LineStream, SourceError};

/// Replays a fixed list of lines, then either ends, fails, or stays open
/// until cancelled.
#[derive(Debug, Clone)]
pub struct VecSource {
    name: String,
    lines: Arc<Vec<String>>,
    fail_with: Option<String>,
    hold_open: bool,
}

impl VecSource {
    pub fn new(name: impl Into<String>, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            lines: Arc::new(lines.into_iter().map(Into::into).collect()),
            fail_with: None,
            hold_open: false,
        }
    }

    /// End the stream with `SourceError::NotFound(reason)` after the lines.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }

    /// Keep the stream open after the lines until the token is cancelled.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

impl LineSource for VecSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn follow(&self, token: CancellationToken) -> LineStream {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let source = self.clone();

        tokio::spawn(async move {
            for line in source.lines.iter() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = tx.send(Ok(line.clone())) => if sent.is_err() { return },
                }
            }
            if let Some(reason) = source.fail_with {
                let _ = tx.send(Err(SourceError::NotFound(reason))).await;
                return;
            }
            if source.hold_open {
                token.cancelled().await;
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_then_ends() {
        let source = VecSource::new("mem", ["a", "b"]);
        let lines: Vec<_> = source.follow(CancellationToken::new()).collect().await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].as_ref().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_failing_source_ends_with_error() {
        let source = VecSource::new("mem", ["a"]).failing("gone");
        let lines: Vec<_> = source.follow(CancellationToken::new()).collect().await;
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[1], Err(SourceError::NotFound(_))));
    }
}
