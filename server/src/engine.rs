//! The tail engine: cursor tracking, delta extraction and fan-out.
//!
//! A [`TailEngine`] owns everything that is shared between the watcher task
//! and the connection tasks: the [`CursorStore`], the [`BroadcastHub`] and a
//! gate that serializes every cycle touching the cursor.
//!
//! # Cycles
//!
//! - **Change cycle** ([`TailEngine::on_change`]): stat the file, read
//!   `[cursor, size)`, advance the cursor past the bytes consumed, broadcast
//!   the lines.
//! - **Attach** ([`TailEngine::attach`]): run a change cycle for the
//!   subscribers already live, enqueue a snapshot ending at the cursor for the
//!   newcomer, then register it. Because both steps happen under the gate, a
//!   new subscriber sees every byte either in its snapshot or in a later
//!   delta, never both and never neither.
//!
//! # Truncation
//!
//! If the file is smaller than the cursor, the file was truncated or
//! replaced. The cursor is reset to 0 and the new content is read from the
//! start. A replacement the watcher notices (remove or rename) is handled the
//! same way through [`TailEngine::rewind`], whatever the new file's size.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::broadcast::{BroadcastHub, SubscriberHandle, SubscriberId};
use crate::cursor::CursorStore;
use crate::error::TailError;
use crate::reader::{self, LogChunk};

/// Default lookback window for snapshots, in bytes.
pub const DEFAULT_SNAPSHOT_WINDOW: u64 = 1024;

/// Default cap on lines per payload.
pub const DEFAULT_MAX_LINES: usize = 10;

/// Settings for snapshot and delta extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    /// How many bytes before the cursor a snapshot reads.
    pub snapshot_window: u64,

    /// Maximum number of lines in one payload.
    pub max_lines: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            snapshot_window: DEFAULT_SNAPSHOT_WINDOW,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// Result of one change cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The file did not grow; nothing was sent.
    Unchanged,

    /// New content was read and broadcast.
    Broadcast {
        /// Bytes consumed by this cycle.
        bytes: u64,
        /// Lines in the payload after the cap.
        lines: usize,
        /// Subscribers the payload was delivered to.
        delivered: usize,
    },
}

/// Tails one log file and fans new lines out to subscribers.
#[derive(Debug)]
pub struct TailEngine {
    path: PathBuf,
    options: TailOptions,
    cursor: CursorStore,
    hub: BroadcastHub,
    gate: Mutex<()>,
}

impl TailEngine {
    /// Creates an engine whose cursor starts at the beginning of the file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, options: TailOptions) -> Self {
        Self::with_cursor(path.into(), options, 0)
    }

    /// Creates an engine whose cursor starts at the current end of the file.
    ///
    /// Content already in the file is only ever sent as part of a snapshot,
    /// never as a delta.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Read`] if the file cannot be stat'd.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use logtail_server::engine::{TailEngine, TailOptions};
    ///
    /// # async fn example() -> Result<(), logtail_server::error::TailError> {
    /// let engine = TailEngine::open("logs.txt", TailOptions::default()).await?;
    /// println!("starting at byte {}", engine.cursor());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(path: impl Into<PathBuf>, options: TailOptions) -> Result<Self, TailError> {
        let path = path.into();
        let size = reader::file_size(&path).await?;
        info!(
            path = %path.display(),
            cursor = size,
            "Tail engine opened"
        );
        Ok(Self::with_cursor(path, options, size))
    }

    fn with_cursor(path: PathBuf, options: TailOptions, offset: u64) -> Self {
        Self {
            path,
            options,
            cursor: CursorStore::new(offset),
            hub: BroadcastHub::new(),
            gate: Mutex::new(()),
        }
    }

    /// Path of the tailed file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extraction settings.
    #[must_use]
    pub fn options(&self) -> TailOptions {
        self.options
    }

    /// Current cursor offset.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.get()
    }

    /// The subscriber registry.
    #[must_use]
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Runs one change cycle.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Read`] if the file cannot be stat'd or read. The
    /// cursor is left unchanged so the next cycle retries the same range.
    pub async fn on_change(&self) -> Result<ChangeOutcome, TailError> {
        let _gate = self.gate.lock().await;
        self.advance().await
    }

    /// Reads the snapshot a new subscriber would receive right now.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::Read`] if the file cannot be read.
    pub async fn snapshot(&self) -> Result<LogChunk, TailError> {
        let _gate = self.gate.lock().await;
        self.read_snapshot().await
    }

    /// Attaches a subscriber: snapshot first, then live deltas.
    ///
    /// Read failures are logged and do not prevent registration; the
    /// subscriber simply starts without a snapshot.
    pub async fn attach(&self, handle: SubscriberHandle) -> SubscriberId {
        let _gate = self.gate.lock().await;

        if let Err(err) = self.advance().await {
            warn!(error = %err, "Catch-up read before snapshot failed");
        }

        match self.read_snapshot().await {
            Ok(chunk) => match chunk.payload() {
                Some(payload) => {
                    if let Err(err) = handle.deliver(&payload) {
                        debug!(error = %err, "Subscriber went away before its snapshot");
                    }
                }
                None => trace!("Empty snapshot, nothing to send"),
            },
            Err(err) => warn!(error = %err, "Snapshot read failed"),
        }

        self.hub.register(handle)
    }

    /// Moves the cursor back to the start of the file.
    ///
    /// Called when the file at `path` was removed or renamed: whatever shows
    /// up there next is a new file and is read from its first byte.
    pub async fn rewind(&self) {
        let _gate = self.gate.lock().await;
        let previous = self.cursor.get();
        self.cursor.reset();
        info!(
            path = %self.path.display(),
            old_pos = previous,
            "Log file replaced, cursor rewound to 0"
        );
    }

    /// Detaches a subscriber. Returns `false` if it was already gone.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.hub.unregister(id)
    }

    /// Change cycle body; the caller holds the gate.
    async fn advance(&self) -> Result<ChangeOutcome, TailError> {
        let size = reader::file_size(&self.path).await?;
        let cursor = self.cursor.get();

        let start = if size < cursor {
            info!(
                path = %self.path.display(),
                old_pos = cursor,
                new_size = size,
                "File truncated, resetting cursor to 0"
            );
            0
        } else {
            cursor
        };

        if size == start {
            if start != cursor {
                self.cursor.reset();
            }
            trace!(cursor = start, "No new bytes");
            return Ok(ChangeOutcome::Unchanged);
        }

        let chunk = reader::read_tail(&self.path, start, size, self.options.max_lines).await?;
        let end = chunk.end();
        self.cursor.set(end);

        let Some(payload) = chunk.payload() else {
            trace!(from = start, to = end, "Nothing to send for this range");
            return Ok(ChangeOutcome::Unchanged);
        };

        let delivered = self.hub.broadcast(&payload);
        debug!(
            from = start,
            to = end,
            lines = chunk.len(),
            delivered,
            "Broadcast delta"
        );

        Ok(ChangeOutcome::Broadcast {
            bytes: end - start,
            lines: chunk.len(),
            delivered,
        })
    }

    /// Reads the window ending at the cursor; the caller holds the gate.
    async fn read_snapshot(&self) -> Result<LogChunk, TailError> {
        let end = self.cursor.get();
        let start = reader::snapshot_start(end, self.options.snapshot_window);
        reader::read_tail(&self.path, start, end, self.options.max_lines).await
    }
}
