//! Draining of encoder output into a bounded diagnostic buffer.
//!
//! The drain only appends lines. It never touches recording state, so the exit
//! path can read whatever was captured without racing it.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::program::RecordingIdentity;

/// Last `capacity` lines written by the encoder.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }
}

/// Longest line kept; the rest of an overlong line is dropped.
const MAX_LINE_BYTES: usize = 4096;

/// Splits a byte stream into lines on `\n` or `\r`, whatever the encoding.
struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next non-empty line, `None` at end of stream. Cancel safe: partial input
    /// stays in `pending`.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_pending()));
            }

            let room = MAX_LINE_BYTES.saturating_sub(self.pending.len());
            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    self.pending.extend_from_slice(&available[..end.min(room)]);
                    self.reader.consume(end + 1);
                    if !self.pending.is_empty() {
                        return Ok(Some(self.take_pending()));
                    }
                }
                None => {
                    let len = available.len();
                    self.pending.extend_from_slice(&available[..len.min(room)]);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

enum Source {
    Stdout,
    Stderr,
}

/// Spawns the single drain task of a capture, reading both output streams until EOF.
pub fn spawn_drain(
    identity: RecordingIdentity,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    buffer: OutputBuffer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = stdout.map(LineReader::new);
        let mut stderr = stderr.map(LineReader::new);

        loop {
            let (source, line) = tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => (Source::Stdout, line),
                line = next_line(&mut stderr), if stderr.is_some() => (Source::Stderr, line),
                else => break,
            };

            match (source, line) {
                (_, Ok(Some(line))) => {
                    debug!("[{}] {}", identity, line);
                    buffer.push(line);
                }
                (Source::Stdout, Ok(None)) => stdout = None,
                (Source::Stderr, Ok(None)) => stderr = None,
                (Source::Stdout, Err(e)) => {
                    warn!("Reading stdout of {} failed: {}", identity, e);
                    stdout = None;
                }
                (Source::Stderr, Err(e)) => {
                    warn!("Reading stderr of {} failed: {}", identity, e);
                    stderr = None;
                }
            }
        }

        debug!("Output drain for {} finished", identity);
    })
}

async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut Option<LineReader<R>>,
) -> io::Result<Option<String>> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_keeps_most_recent_lines() {
        let buffer = OutputBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        assert_eq!(buffer.snapshot(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_buffer_clones_share_lines() {
        let buffer = OutputBuffer::new(10);
        let writer = buffer.clone();
        writer.push("hello".to_string());
        assert_eq!(buffer.snapshot(), vec!["hello"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_reads_both_streams() {
        use crate::program::ProgramId;
        use std::process::Stdio;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let buffer = OutputBuffer::new(10);
        let identity = RecordingIdentity::new(ProgramId::new("p"), "20230716".parse().unwrap());
        let drain = spawn_drain(identity, child.stdout.take(), child.stderr.take(), buffer.clone());

        child.wait().await.unwrap();
        drain.await.unwrap();

        let mut lines = buffer.snapshot();
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    async fn test_line_reader_accepts_any_bytes() {
        let input: &[u8] = b"StreamTitle: \xe9t\xe9\nframe=1\rframe=2\r\nlast";
        let mut reader = LineReader::new(input);

        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec!["StreamTitle: \u{fffd}t\u{fffd}", "frame=1", "frame=2", "last"]
        );
    }

    #[tokio::test]
    async fn test_line_reader_caps_long_lines() {
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3];
        input.extend_from_slice(b"\nnext\n");
        let mut reader = LineReader::new(input.as_slice());

        assert_eq!(reader.next_line().await.unwrap().unwrap().len(), MAX_LINE_BYTES);
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "next");
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_survives_invalid_utf8_until_eof() {
        use crate::program::ProgramId;
        use std::process::Stdio;

        // Latin-1 metadata, then enough output to fill a closed pipe.
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("printf 'StreamTitle: \\351t\\351\\n' 1>&2; sleep 0.2; \
                  i=0; while [ $i -lt 3000 ]; do echo \"size=$i\" 1>&2; i=$((i+1)); done; echo done 1>&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let buffer = OutputBuffer::new(5);
        let identity = RecordingIdentity::new(ProgramId::new("p"), "20230716".parse().unwrap());
        let drain = spawn_drain(identity, child.stdout.take(), child.stderr.take(), buffer.clone());

        let status = child.wait().await.unwrap();
        drain.await.unwrap();

        assert!(status.success(), "writer died: {:?}", status);
        assert_eq!(buffer.snapshot().last().map(String::as_str), Some("done"));
    }
}
