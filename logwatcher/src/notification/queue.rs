//! Bounded alert queue between the watch sources and the dispatcher.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::alert::Alert;
use crate::{Error, Result};

/// Default number of alerts buffered before producers are held back.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Create a queue holding at most `capacity` alerts.
///
/// The queue closes once every [`AlertSender`] clone has been dropped; the
/// receiver then yields what is still buffered and ends.
pub fn alert_queue(capacity: usize) -> (AlertSender, AlertReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AlertSender { tx }, AlertReceiver { rx })
}

/// Producer half, cloned once per watch source.
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<Alert>,
}

impl AlertSender {
    /// Enqueue an alert, waiting while the queue is full.
    ///
    /// Returns [`Error::Cancelled`] if the token fires first and
    /// [`Error::QueueClosed`] if the consumer is gone.
    pub async fn push(&self, alert: Alert, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            sent = self.tx.send(alert) => sent.map_err(|_| Error::QueueClosed),
        }
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer half, owned by the dispatcher.
#[derive(Debug)]
pub struct AlertReceiver {
    rx: mpsc::Receiver<Alert>,
}

impl AlertReceiver {
    /// Next alert in arrival order, or `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<Alert> {
        self.rx.recv().await
    }

    /// Alerts currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
