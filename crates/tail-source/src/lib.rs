//! # Tail Source
//!
//! Lazy line producers for log followers. A source starts at the current end
//! of whatever it watches and yields every line appended afterwards until its
//! cancellation token fires.
//!
//! - [`FileSource`] follows a regular file, reopening it across rotation and
//!   truncation.
//! - [`JournalSource`] follows a systemd unit through `journalctl`,
//!   re-attaching by cursor when the reader process goes away.
//!
//! Both implement [`LineSource`]; consumers only ever see a [`LineStream`].

use std::pin::Pin;

use futures::Stream;
use tokio_util::sync::CancellationToken;

mod error;
mod file;
mod journal;
#[cfg(any(test, feature = "test-util"))]
mod memory;

pub use error::SourceError;
pub use file::FileSource;
pub use journal::{JournalEntry, JournalSource};
#[cfg(any(test, feature = "test-util"))]
pub use memory::VecSource;

/// Stream of lines produced by a [`LineSource`].
///
/// An `Err` item is terminal: the stream ends right after it.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, SourceError>> + Send>>;

/// Capacity of the channel between a follower task and its stream.
pub(crate) const LINE_CHANNEL_CAPACITY: usize = 16;

/// A restartable producer of text lines.
pub trait LineSource: Send + Sync {
    /// Human readable identity of the source (path or unit name).
    fn describe(&self) -> String;

    /// Start following the source.
    ///
    /// The follower runs on a background task that stops when `token` is
    /// cancelled or the returned stream is dropped.
    fn follow(&self, token: CancellationToken) -> LineStream;
}
