//! File follower with reopen on rotation and truncation.

use std::fs::Metadata;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{LINE_CHANNEL_CAPACITY, LineSource, LineStream, SourceError};

/// Default delay between checks once the end of the file is reached.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default longest line; longer runs without a newline are split.
const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Follows a single file, like `tail -F`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    poll_interval: Duration,
    max_line_bytes: usize,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Override how often the file is checked for new data at EOF.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the longest line emitted in one piece.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Open the file positioned at its current end.
    ///
    /// This uses blocking `std::fs` calls on purpose: it runs inside
    /// `follow`, before the follower task exists, so that "current end" is
    /// the end at the time of the call. Open, stat and seek do not wait on
    /// file contents.
    fn open_at_end(&self) -> Result<OpenFile, SourceError> {
        let mut file = std::fs::File::open(&self.path)
            .map_err(|e| SourceError::from_open(&self.path, e))?;
        let metadata = file
            .metadata()
            .map_err(|e| SourceError::from_open(&self.path, e))?;
        let offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| SourceError::from_open(&self.path, e))?;

        Ok(OpenFile {
            reader: BufReader::new(File::from_std(file)),
            identity: FileIdentity::of(&metadata),
            offset,
        })
    }
}

impl LineSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn follow(&self, token: CancellationToken) -> LineStream {
        // Opened eagerly so "current end" means the end at the time of the call.
        let open = match self.open_at_end() {
            Ok(open) => open,
            Err(e) => return futures::stream::once(async move { Err(e) }).boxed(),
        };

        info!(path = %self.path.display(), offset = open.offset, "Following file");

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let follower = Follower {
            path: self.path.clone(),
            poll_interval: self.poll_interval,
            max_line_bytes: self.max_line_bytes,
            open,
            pending: Vec::new(),
            tx,
        };
        tokio::spawn(follower.run(token));

        ReceiverStream::new(rx).boxed()
    }
}

/// Identity of the file behind a path, used to detect rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

struct OpenFile {
    reader: BufReader<File>,
    identity: Option<FileIdentity>,
    offset: u64,
}

/// What the path looks like after the reader hit EOF.
#[derive(Debug, PartialEq, Eq)]
enum PathState {
    Unchanged,
    Truncated,
    Rotated,
    Missing,
}

struct Follower {
    path: PathBuf,
    poll_interval: Duration,
    max_line_bytes: usize,
    open: OpenFile,
    /// Bytes of a line that has not been terminated yet.
    pending: Vec<u8>,
    tx: mpsc::Sender<Result<String, SourceError>>,
}

impl Follower {
    async fn run(mut self, token: CancellationToken) {
        loop {
            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = self.read_chunk() => read,
            };

            match read {
                Ok(0) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    match self.check_path(&token).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            let _ = self.tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
                Ok(_) => {
                    if self.line_ready() && !self.flush_pending(&token).await {
                        break;
                    }
                }
                Err(error) => {
                    let _ = self
                        .tx
                        .send(Err(SourceError::Io {
                            path: self.path.clone(),
                            error,
                        }))
                        .await;
                    break;
                }
            }
        }

        debug!(path = %self.path.display(), "File follower stopped");
    }

    /// Read up to the next newline, never letting `pending` exceed the line limit.
    ///
    /// Returns 0 only at end of file.
    async fn read_chunk(&mut self) -> std::io::Result<usize> {
        let room = self.max_line_bytes.saturating_sub(self.pending.len()).max(1);
        let n = (&mut self.open.reader)
            .take(room as u64)
            .read_until(b'\n', &mut self.pending)
            .await?;
        self.open.offset += n as u64;
        Ok(n)
    }

    /// Whether `pending` holds a complete line or has reached the line limit.
    fn line_ready(&self) -> bool {
        if self.pending.last() == Some(&b'\n') {
            return true;
        }
        if self.pending.len() >= self.max_line_bytes {
            warn!(
                path = %self.path.display(),
                limit = self.max_line_bytes,
                "Line exceeds the length limit, splitting it"
            );
            return true;
        }
        false
    }

    /// Emit whatever is left in the current file, including an unterminated tail.
    ///
    /// Returns `false` once the follower should stop.
    async fn drain(&mut self, token: &CancellationToken) -> Result<bool, SourceError> {
        loop {
            let n = self.read_chunk().await.map_err(|error| SourceError::Io {
                path: self.path.clone(),
                error,
            })?;
            if n == 0 {
                break;
            }
            if self.line_ready() && !self.flush_pending(token).await {
                return Ok(false);
            }
        }
        Ok(self.flush_pending(token).await)
    }

    /// Send the pending bytes as one line. Returns `false` once the follower should stop.
    async fn flush_pending(&mut self, token: &CancellationToken) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        trace!(path = %self.path.display(), line = %line, "Read line");

        tokio::select! {
            _ = token.cancelled() => false,
            sent = self.tx.send(Ok(line)) => sent.is_ok(),
        }
    }

    /// React to truncation or rotation. Returns `false` once the follower should stop.
    async fn check_path(&mut self, token: &CancellationToken) -> Result<bool, SourceError> {
        let state = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => classify(&self.open, &metadata),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PathState::Missing,
            Err(e) => return Err(SourceError::from_open(&self.path, e)),
        };

        match state {
            PathState::Unchanged | PathState::Missing => Ok(true),
            PathState::Truncated => {
                info!(path = %self.path.display(), "File truncated, reading from start");
                if !self.flush_pending(token).await {
                    return Ok(false);
                }
                self.open
                    .reader
                    .seek(SeekFrom::Start(0))
                    .await
                    .map_err(|error| SourceError::Io {
                        path: self.path.clone(),
                        error,
                    })?;
                self.open.offset = 0;
                Ok(true)
            }
            PathState::Rotated => {
                let file = match File::open(&self.path).await {
                    Ok(file) => file,
                    // Re-created between the metadata call and the open; retry on next poll.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
                    Err(e) => return Err(SourceError::from_open(&self.path, e)),
                };
                let metadata = file
                    .metadata()
                    .await
                    .map_err(|e| SourceError::from_open(&self.path, e))?;

                info!(path = %self.path.display(), "File rotated, reopening");
                // Lines written just before the rename are still in the old handle.
                if !self.drain(token).await? {
                    return Ok(false);
                }
                self.open = OpenFile {
                    reader: BufReader::new(file),
                    identity: FileIdentity::of(&metadata),
                    offset: 0,
                };
                Ok(true)
            }
        }
    }
}

fn classify(open: &OpenFile, metadata: &Metadata) -> PathState {
    let current = FileIdentity::of(metadata);
    if current.is_some() && current != open.identity {
        return PathState::Rotated;
    }
    if metadata.len() < open.offset {
        return PathState::Truncated;
    }
    PathState::Unchanged
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    match std::str::from_utf8(&raw[..end]) {
        Ok(line) => line.to_string(),
        Err(_) => {
            warn!("Line contained invalid UTF-8, replaced lossily");
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use futures::StreamExt;
    use tokio::time::timeout;

    use super::*;

    const POLL: Duration = Duration::from_millis(10);
    const WAIT: Duration = Duration::from_secs(5);

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    async fn next_line(stream: &mut LineStream) -> String {
        timeout(WAIT, stream.next())
            .await
            .expect("timed out waiting for line")
            .expect("stream ended")
            .expect("source error")
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"partial"), "partial");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("nope.log"));

        let mut stream = source.follow(CancellationToken::new());
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(SourceError::NotFound(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_starts_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old line 1\nold line 2\n");

        let source = FileSource::new(&path).with_poll_interval(POLL);
        let mut stream = source.follow(CancellationToken::new());

        append(&path, "new line\n");
        assert_eq!(next_line(&mut stream).await, "new line");
    }

    #[tokio::test]
    async fn test_partial_line_is_buffered_until_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let source = FileSource::new(&path).with_poll_interval(POLL);
        let mut stream = source.follow(CancellationToken::new());

        append(&path, "ERROR disk");
        tokio::time::sleep(POLL * 5).await;
        append(&path, " full\nsecond\n");

        assert_eq!(next_line(&mut stream).await, "ERROR disk full");
        assert_eq!(next_line(&mut stream).await, "second");
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let source = FileSource::new(&path).with_poll_interval(POLL);
        let mut stream = source.follow(CancellationToken::new());

        append(&path, "before truncate with a long tail of text\n");
        assert_eq!(
            next_line(&mut stream).await,
            "before truncate with a long tail of text"
        );

        std::fs::write(&path, "").unwrap();
        tokio::time::sleep(POLL * 5).await;
        append(&path, "after\n");
        assert_eq!(next_line(&mut stream).await, "after");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rotation_reopens_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let source = FileSource::new(&path).with_poll_interval(POLL);
        let mut stream = source.follow(CancellationToken::new());

        append(&path, "in old file\n");
        assert_eq!(next_line(&mut stream).await, "in old file");

        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        append(&path, "in new file\n");
        assert_eq!(next_line(&mut stream).await, "in new file");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rotation_keeps_lines_written_before_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        // Slow polling so the rename lands while the old file is still at EOF.
        let source = FileSource::new(&path).with_poll_interval(Duration::from_millis(300));
        let mut stream = source.follow(CancellationToken::new());

        append(&path, "first\n");
        assert_eq!(next_line(&mut stream).await, "first");

        append(&path, "ERROR written just before rotation\n");
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        append(&path, "in new file\n");

        assert_eq!(
            next_line(&mut stream).await,
            "ERROR written just before rotation"
        );
        assert_eq!(next_line(&mut stream).await, "in new file");
    }

    #[tokio::test]
    async fn test_overlong_line_is_split_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let source = FileSource::new(&path)
            .with_poll_interval(POLL)
            .with_max_line_bytes(16);
        let mut stream = source.follow(CancellationToken::new());

        append(&path, "0123456789abcdefXYZ\nshort\n");
        assert_eq!(next_line(&mut stream).await, "0123456789abcdef");
        assert_eq!(next_line(&mut stream).await, "XYZ");
        assert_eq!(next_line(&mut stream).await, "short");
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let token = CancellationToken::new();
        let source = FileSource::new(&path).with_poll_interval(POLL);
        let mut stream = source.follow(token.clone());

        token.cancel();
        let end = timeout(WAIT, stream.next()).await.unwrap();
        assert!(end.is_none());
    }
}
