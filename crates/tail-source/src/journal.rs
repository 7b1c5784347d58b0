//! systemd journal follower backed by `journalctl`.

use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{LINE_CHANNEL_CAPACITY, LineSource, LineStream, SourceError};

const DEFAULT_PROGRAM: &str = "journalctl";

/// Delay before re-attaching after `journalctl` went away.
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Consecutive failed re-attaches tolerated before the source gives up.
const MAX_REATTACH_FAILURES: u32 = 5;

/// Upper bound on captured stderr.
const STDERR_LIMIT: u64 = 4096;

/// Follows the journal entries of one systemd unit.
#[derive(Debug, Clone)]
pub struct JournalSource {
    unit: String,
    program: String,
    restart_delay: Duration,
}

impl JournalSource {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            program: DEFAULT_PROGRAM.to_string(),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    /// Use a different `journalctl` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Arguments for one `journalctl` invocation.
    ///
    /// Without a cursor the reader starts at the current end of the journal.
    pub fn args(&self, after_cursor: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--follow".to_string(),
            "--output=json".to_string(),
            format!("--unit={}", self.unit),
        ];
        match after_cursor {
            Some(cursor) => args.push(format!("--after-cursor={cursor}")),
            None => args.push("--lines=0".to_string()),
        }
        args
    }

    fn spawn(&self, after_cursor: Option<&str>) -> Result<Child, SourceError> {
        Command::new(&self.program)
            .args(self.args(after_cursor))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::from_spawn(&self.program, e))
    }

    async fn run(self, tx: mpsc::Sender<Result<String, SourceError>>, token: CancellationToken) {
        let mut cursor: Option<String> = None;
        let mut failures = 0u32;

        loop {
            let mut child = match self.spawn(cursor.as_deref()) {
                Ok(child) => child,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            debug!(unit = %self.unit, cursor = ?cursor, "journalctl attached");

            let stderr = child.stderr.take().map(|mut stderr| {
                tokio::spawn(async move {
                    let mut captured = String::new();
                    let _ = (&mut stderr)
                        .take(STDERR_LIMIT)
                        .read_to_string(&mut captured)
                        .await;
                    // Keep draining so journalctl never blocks on a full pipe.
                    let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
                    captured
                })
            });
            let Some(stdout) = child.stdout.take() else {
                let _ = tx
                    .send(Err(SourceError::Spawn {
                        program: self.program.clone(),
                        error: std::io::Error::other("stdout was not captured"),
                    }))
                    .await;
                return;
            };

            let mut lines = BufReader::new(stdout).lines();
            let mut entries = 0u64;

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => {
                        let _ = child.kill().await;
                        return;
                    }
                    next = lines.next_line() => next,
                };

                match next {
                    Ok(Some(raw)) => {
                        let Some(entry) = JournalEntry::parse(&raw) else {
                            warn!(unit = %self.unit, "Skipping malformed journal entry");
                            continue;
                        };
                        entries += 1;
                        if entry.cursor.is_some() {
                            cursor = entry.cursor;
                        }
                        let sent = tokio::select! {
                            _ = token.cancelled() => false,
                            sent = tx.send(Ok(entry.message)) => sent.is_ok(),
                        };
                        if !sent {
                            let _ = child.kill().await;
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = child.kill().await;
                        let _ = tx
                            .send(Err(SourceError::Io {
                                path: self.unit.clone().into(),
                                error,
                            }))
                            .await;
                        return;
                    }
                }
            }

            let status = child.wait().await;
            let stderr = match stderr {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };

            match status {
                Ok(status) if status.success() || entries > 0 => {
                    failures = 0;
                    info!(unit = %self.unit, %status, "journalctl exited, re-attaching");
                }
                Ok(status) => {
                    // Without a cursor the filter itself is rejected; with one, the
                    // cursor may be gone for good (journal vacuum).
                    failures += 1;
                    if cursor.is_none() || failures >= MAX_REATTACH_FAILURES {
                        let message = if stderr.trim().is_empty() {
                            format!("journalctl exited with {status}")
                        } else {
                            stderr.trim().to_string()
                        };
                        let _ = tx
                            .send(Err(SourceError::InvalidFilter {
                                unit: self.unit.clone(),
                                message,
                            }))
                            .await;
                        return;
                    }
                    warn!(
                        unit = %self.unit,
                        %status,
                        failures,
                        "journalctl failed to re-attach, retrying"
                    );
                }
                Err(error) => {
                    let _ = tx
                        .send(Err(SourceError::Spawn {
                            program: self.program.clone(),
                            error,
                        }))
                        .await;
                    return;
                }
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.restart_delay) => {}
            }
        }
    }
}

impl LineSource for JournalSource {
    fn describe(&self) -> String {
        self.unit.clone()
    }

    fn follow(&self, token: CancellationToken) -> LineStream {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        info!(unit = %self.unit, "Following journal unit");
        tokio::spawn(self.clone().run(tx, token));
        ReceiverStream::new(rx).boxed()
    }
}

/// One entry of `journalctl --output=json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub message: String,
    pub cursor: Option<String>,
}

impl JournalEntry {
    /// Parse a JSON journal record. Binary messages arrive as byte arrays.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let message = match value.get("MESSAGE")? {
            Value::String(s) => s.clone(),
            Value::Array(bytes) => {
                let bytes: Vec<u8> = bytes
                    .iter()
                    .filter_map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect();
                String::from_utf8_lossy(&bytes).into_owned()
            }
            _ => return None,
        };
        let cursor = value
            .get("__CURSOR")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self { message, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_message() {
        let entry =
            JournalEntry::parse(r#"{"MESSAGE":"Failed password for root","__CURSOR":"s=1;i=2"}"#)
                .unwrap();
        assert_eq!(entry.message, "Failed password for root");
        assert_eq!(entry.cursor.as_deref(), Some("s=1;i=2"));
    }

    #[test]
    fn test_parse_binary_message() {
        let entry = JournalEntry::parse(r#"{"MESSAGE":[104,105]}"#).unwrap();
        assert_eq!(entry.message, "hi");
        assert!(entry.cursor.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(JournalEntry::parse("not json").is_none());
        assert!(JournalEntry::parse(r#"{"__CURSOR":"x"}"#).is_none());
        assert!(JournalEntry::parse(r#"{"MESSAGE":42}"#).is_none());
    }

    #[test]
    fn test_args_start_at_end_without_cursor() {
        let source = JournalSource::new("sshd.service");
        let args = source.args(None);
        assert!(args.contains(&"--follow".to_string()));
        assert!(args.contains(&"--unit=sshd.service".to_string()));
        assert!(args.contains(&"--lines=0".to_string()));

        let args = source.args(Some("abc"));
        assert!(args.contains(&"--after-cursor=abc".to_string()));
        assert!(!args.contains(&"--lines=0".to_string()));
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let source = JournalSource::new("x.service").with_program("/nonexistent/journalctl");
        let mut stream = source.follow(CancellationToken::new());
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(SourceError::NotFound(_))));
        assert!(stream.next().await.is_none());
    }

    #[cfg(unix)]
    mod fake_journalctl {
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        use tokio::time::timeout;

        use super::*;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("journalctl");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_lines_are_forwarded() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(
                dir.path(),
                r#"echo '{"MESSAGE":"hello","__CURSOR":"c1"}'
echo 'garbage'
echo '{"MESSAGE":"world","__CURSOR":"c2"}'
sleep 30"#,
            );

            let token = CancellationToken::new();
            let source = JournalSource::new("x.service").with_program(program.to_string_lossy());
            let mut stream = source.follow(token.clone());

            let wait = Duration::from_secs(5);
            assert_eq!(timeout(wait, stream.next()).await.unwrap().unwrap().unwrap(), "hello");
            assert_eq!(timeout(wait, stream.next()).await.unwrap().unwrap().unwrap(), "world");

            token.cancel();
            assert!(timeout(wait, stream.next()).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_failing_filter_is_reported() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(dir.path(), "echo 'Invalid unit name' >&2\nexit 1");

            let source = JournalSource::new("bad unit").with_program(program.to_string_lossy());
            let mut stream = source.follow(CancellationToken::new());

            let first = timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap();
            match first {
                Err(SourceError::InvalidFilter { unit, message }) => {
                    assert_eq!(unit, "bad unit");
                    assert!(message.contains("Invalid unit name"));
                }
                other => panic!("unexpected item: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_reattaches_after_last_cursor() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(
                dir.path(),
                r#"for arg in "$@"; do
  case "$arg" in
    --after-cursor=c1) echo '{"MESSAGE":"after restart","__CURSOR":"c2"}'; sleep 30 ;;
  esac
done
echo '{"MESSAGE":"before restart","__CURSOR":"c1"}'
exit 0"#,
            );

            let token = CancellationToken::new();
            let source = JournalSource::new("x.service")
                .with_program(program.to_string_lossy())
                .with_restart_delay(Duration::from_millis(10));
            let mut stream = source.follow(token.clone());

            let wait = Duration::from_secs(5);
            assert_eq!(
                timeout(wait, stream.next()).await.unwrap().unwrap().unwrap(),
                "before restart"
            );
            assert_eq!(
                timeout(wait, stream.next()).await.unwrap().unwrap().unwrap(),
                "after restart"
            );
            token.cancel();
        }

        #[tokio::test]
        async fn test_reattach_that_keeps_failing_is_reported() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(
                dir.path(),
                r#"for arg in "$@"; do
  case "$arg" in
    --after-cursor=*) echo 'cursor no longer exists' >&2; exit 1 ;;
  esac
done
echo '{"MESSAGE":"before vacuum","__CURSOR":"c1"}'
exit 0"#,
            );

            let source = JournalSource::new("x.service")
                .with_program(program.to_string_lossy())
                .with_restart_delay(Duration::from_millis(10));
            let mut stream = source.follow(CancellationToken::new());

            let wait = Duration::from_secs(10);
            assert_eq!(
                timeout(wait, stream.next()).await.unwrap().unwrap().unwrap(),
                "before vacuum"
            );
            match timeout(wait, stream.next()).await.unwrap().unwrap() {
                Err(SourceError::InvalidFilter { unit, message }) => {
                    assert_eq!(unit, "x.service");
                    assert!(message.contains("cursor no longer exists"));
                }
                other => panic!("unexpected item: {other:?}"),
            }
            assert!(timeout(wait, stream.next()).await.unwrap().is_none());
        }
    }
}
