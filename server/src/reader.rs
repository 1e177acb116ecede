//! Byte-range reads of the tailed log file.
//!
//! The reader turns a `[start, end)` byte range into a [`LogChunk`]: the lines
//! found in that range, capped to the last `max_lines` entries. The range is
//! streamed line by line, so only the kept lines are held in memory. Chunks
//! are rendered for the wire by joining lines with [`PAYLOAD_SEPARATOR`],
//! which is the format the viewer page expects.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use logtail_server::reader::{file_size, read_tail, snapshot_start};
//!
//! # async fn example() -> Result<(), logtail_server::error::TailError> {
//! let path = Path::new("logs.txt");
//! let end = file_size(path).await?;
//! let chunk = read_tail(path, snapshot_start(end, 1024), end, 10).await?;
//! if let Some(payload) = chunk.payload() {
//!     println!("{payload}");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::trace;

use crate::error::TailError;

/// Separator placed between lines of a payload.
pub const PAYLOAD_SEPARATOR: &str = "\n\n";

/// Ordered lines extracted from one byte range of the log file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogChunk {
    lines: Vec<String>,
    end: u64,
}

impl LogChunk {
    /// Builds a chunk from already-split lines that were read up to `end`.
    #[must_use]
    pub fn new(lines: Vec<String>, end: u64) -> Self {
        Self { lines, end }
    }

    /// The extracted lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Offset just past the last byte consumed.
    ///
    /// Smaller than the requested range end when the file shrank during the
    /// read or the range ends inside a multi-byte character.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of lines kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if the range contained no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Renders the chunk as a wire payload.
    ///
    /// Returns `None` when the rendered text would be empty, so callers never
    /// send an empty message.
    ///
    /// ```rust
    /// use logtail_server::reader::LogChunk;
    ///
    /// let chunk = LogChunk::new(vec!["a".into(), "b".into()], 4);
    /// assert_eq!(chunk.payload().as_deref(), Some("a\n\nb"));
    /// assert_eq!(LogChunk::default().payload(), None);
    /// assert_eq!(LogChunk::new(vec![String::new()], 1).payload(), None);
    /// ```
    #[must_use]
    pub fn payload(&self) -> Option<String> {
        let payload = self.lines.join(PAYLOAD_SEPARATOR);
        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }
}

/// Returns the current size of the file at `path` in bytes.
///
/// # Errors
///
/// Returns [`TailError::Read`] if the file cannot be stat'd.
pub async fn file_size(path: &Path) -> Result<u64, TailError> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|err| TailError::read(path, err))?;
    Ok(metadata.len())
}

/// First byte of the snapshot window ending at `range_end`.
///
/// The window may start in the middle of a line; that partial line is kept
/// as-is.
#[must_use]
pub fn snapshot_start(range_end: u64, window: u64) -> u64 {
    range_end.saturating_sub(window)
}

/// Reads `[range_start, range_end)` from `path` and keeps the last `max_lines` lines.
///
/// A terminating newline does not open a new line, a trailing `\r` is
/// stripped from each line, and invalid UTF-8 is replaced. If the range ends
/// inside a multi-byte character, those bytes are left unconsumed (see
/// [`LogChunk::end`]) so the next read picks up the whole character.
///
/// An empty range returns an empty chunk without touching the file. If the
/// file shrank after `range_end` was observed, only the bytes still present
/// are read.
///
/// # Errors
///
/// Returns [`TailError::Read`] if the file cannot be opened, seeked, or read.
pub async fn read_tail(
    path: &Path,
    range_start: u64,
    range_end: u64,
    max_lines: usize,
) -> Result<LogChunk, TailError> {
    if range_start >= range_end {
        return Ok(LogChunk::new(Vec::new(), range_start));
    }

    let mut file = File::open(path)
        .await
        .map_err(|err| TailError::read(path, err))?;
    file.seek(SeekFrom::Start(range_start))
        .await
        .map_err(|err| TailError::read(path, err))?;

    let mut reader = BufReader::new(file).take(range_end - range_start);
    let mut tail = LineTail::new(max_lines);
    let mut line = Vec::new();
    let mut consumed = 0u64;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|err| TailError::read(path, err))?;
        if read == 0 {
            break;
        }

        if let Some(body) = line.strip_suffix(b"\n") {
            tail.push(body);
            consumed += read as u64;
        } else {
            // Unterminated last line: the writer may be mid-character.
            let held = incomplete_utf8_suffix(&line);
            let body = &line[..line.len() - held];
            if !body.is_empty() {
                tail.push(body);
            }
            consumed += (read - held) as u64;
        }
    }

    trace!(
        path = %path.display(),
        range_start,
        range_end,
        consumed,
        lines = tail.lines.len(),
        "Read log range"
    );

    Ok(LogChunk::new(tail.into_lines(), range_start + consumed))
}

/// Ring of the most recent `max_lines` lines.
#[derive(Debug)]
struct LineTail {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl LineTail {
    fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.min(64)),
            max_lines,
        }
    }

    fn push(&mut self, raw: &[u8]) {
        if self.max_lines == 0 {
            return;
        }
        if self.lines.len() == self.max_lines {
            self.lines.pop_front();
        }
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        self.lines.push_back(String::from_utf8_lossy(raw).into_owned());
    }

    fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Number of trailing bytes that start a UTF-8 sequence but do not finish it.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
