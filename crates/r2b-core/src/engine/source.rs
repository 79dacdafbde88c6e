//! Record sources feeding the ingestion boundary.

use crate::{Error, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

/// A stream of raw records.
///
/// `next_record` must be cancel-safe: the engine polls it inside
/// `tokio::select!` next to the shutdown signal.
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, or `None` once the source is exhausted.
    async fn next_record(&mut self) -> Result<Option<String>>;

    /// Name for logging.
    fn describe(&self) -> String {
        "source".to_string()
    }
}

/// Newline-delimited records from any buffered reader.
///
/// Blank lines are skipped and a trailing `\r` is stripped. Bytes that are
/// not valid UTF-8 are replaced with U+FFFD and the line is still returned,
/// so one corrupt line never ends the stream. Partial reads stay in `line`
/// across calls, which keeps `next_record` cancel-safe.
pub struct LineSource<R> {
    reader: R,
    line: Vec<u8>,
    name: String,
    lossy_lines: u64,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            line: Vec::new(),
            name: name.into(),
            lossy_lines: 0,
        }
    }

    /// Lines that needed lossy UTF-8 decoding so far.
    pub fn lossy_lines(&self) -> u64 {
        self.lossy_lines
    }
}

impl LineSource<BufReader<tokio::io::Stdin>> {
    /// Read records from standard input.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl LineSource<BufReader<tokio::fs::File>> {
    /// Read records from a file.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

#[async_trait]
impl<R> RecordSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_record(&mut self) -> Result<Option<String>> {
        loop {
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(|e| Error::Source(format!("{}: {}", self.name, e)))?;

            if read == 0 && self.line.is_empty() {
                return Ok(None);
            }

            let bytes = trim_line_ending(&self.line);
            let decoded = match String::from_utf8_lossy(bytes) {
                Cow::Borrowed(text) => text.to_string(),
                Cow::Owned(text) => {
                    self.lossy_lines += 1;
                    warn!(
                        source = %self.name,
                        bytes = bytes.len(),
                        "Line is not valid UTF-8, invalid bytes replaced"
                    );
                    text
                }
            };
            self.line.clear();

            if decoded.trim().is_empty() {
                continue;
            }
            return Ok(Some(decoded));
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Records pushed through a channel; ends when every sender is dropped.
#[async_trait]
impl RecordSource for mpsc::Receiver<String> {
    async fn next_record(&mut self) -> Result<Option<String>> {
        Ok(self.recv().await)
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}
