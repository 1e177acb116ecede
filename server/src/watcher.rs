//! File watcher that drives the tail engine.
//!
//! This module watches the configured log file with the [`notify`] crate and
//! runs a change cycle on the [`TailEngine`] whenever the file's content
//! changes.
//!
//! # Architecture
//!
//! The notify callback is kept lightweight: it classifies each raw event and
//! sends it through an internal channel to a dedicated async task, which does
//! all file I/O. The task coalesces bursts: every change already queued when
//! it wakes up is folded into a single change cycle.
//!
//! If the file is removed or renamed, or notify reports an error, the watch is
//! considered lost. The state flips to [`WatchState::Lost`], live updates stop,
//! and the task retries arming the watch on a fixed interval. Once the file is
//! back, the state returns to [`WatchState::Watching`] and a change cycle runs
//! immediately. When the file itself went away, the engine cursor is rewound
//! first, so a replacement file is read from its first byte.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use logtail_server::engine::{TailEngine, TailOptions};
//! use logtail_server::watcher::ChangeWatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(TailEngine::open("logs.txt", TailOptions::default()).await?);
//!     let watcher = ChangeWatcher::spawn(Arc::clone(&engine), Duration::from_secs(1))?;
//!
//!     println!("watch state: {:?}", watcher.state());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{
    event::ModifyKind, Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::engine::TailEngine;

/// Capacity of the channel between the notify callback and the async task.
///
/// Dropped change events are harmless: any queued change triggers a read of
/// everything since the cursor.
const INTERNAL_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur while setting up the file watch.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The log file does not exist.
    #[error("log file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Whether live updates are currently flowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    /// The file is being watched.
    Watching,

    /// The watch was lost and is being re-established.
    Lost {
        /// Why the watch was lost.
        reason: String,
    },
}

impl WatchState {
    /// Returns `true` while the file is being watched.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        matches!(self, Self::Watching)
    }
}

/// Events from the notify callback, processed by the async task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InternalEvent {
    Changed,
    Lost(Loss),
}

/// Why the watch was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Loss {
    reason: String,
    /// The file was removed or renamed away, so its offsets no longer apply.
    file_gone: bool,
}

impl Loss {
    fn file_gone(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            file_gone: true,
        }
    }

    fn watch_failed(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            file_gone: false,
        }
    }
}

/// Handle to the running watch task.
///
/// Dropping the handle does not stop the task; call [`ChangeWatcher::abort`].
#[derive(Debug)]
pub struct ChangeWatcher {
    state: watch::Receiver<WatchState>,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Starts watching the engine's log file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log file does not exist
    /// - The file system watcher cannot be initialized
    pub fn spawn(engine: Arc<TailEngine>, rewatch_interval: Duration) -> Result<Self> {
        let path = engine.path().to_path_buf();
        if !path.exists() {
            return Err(WatcherError::FileNotFound(path));
        }

        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let watcher = create_watcher(&path, internal_tx.clone())?;
        let (state_tx, state_rx) = watch::channel(WatchState::Watching);

        info!(
            path = %path.display(),
            rewatch_interval_ms = rewatch_interval.as_millis(),
            "Watching log file"
        );

        let watch_loop = WatchLoop {
            engine,
            watcher: Some(watcher),
            internal_tx,
            internal_rx,
            state: state_tx,
            rewatch_interval,
        };
        let task = tokio::spawn(watch_loop.run());

        Ok(Self {
            state: state_rx,
            task,
        })
    }

    /// Returns the current watch state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }

    /// Stops the watch task.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Creates the underlying notify watcher with a lightweight callback.
fn create_watcher(
    path: &Path,
    internal_tx: mpsc::Sender<InternalEvent>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            handle_notify_event(res, &internal_tx);
        },
        Config::default(),
    )?;

    watcher.watch(path, RecursiveMode::NonRecursive)?;

    debug!(path = %path.display(), "Started file watch");

    Ok(watcher)
}

/// Handles events from the notify crate.
///
/// Only classifies and forwards; never blocks the notify thread.
fn handle_notify_event(
    res: std::result::Result<Event, notify::Error>,
    internal_tx: &mpsc::Sender<InternalEvent>,
) {
    let Some(internal_event) = classify(res) else {
        return;
    };

    if let Err(e) = internal_tx.try_send(internal_event) {
        trace!(error = %e, "Internal event queue full, change will be coalesced");
    }
}

/// Maps a raw notify event to the internal event the task cares about.
fn classify(res: std::result::Result<Event, notify::Error>) -> Option<InternalEvent> {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return Some(InternalEvent::Lost(Loss::watch_failed(format!(
                "watcher error: {e}"
            ))));
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) => {
            Some(InternalEvent::Lost(Loss::file_gone("log file was renamed")))
        }
        EventKind::Remove(_) => Some(InternalEvent::Lost(Loss::file_gone("log file was removed"))),
        // Metadata covers the link-count change that precedes a delete; the
        // change cycle then sees the file is gone.
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Create(_)
        | EventKind::Any => Some(InternalEvent::Changed),
        _ => {
            trace!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }
}

/// State owned by the watch task.
struct WatchLoop {
    engine: Arc<TailEngine>,
    /// Kept alive to maintain the watch subscription.
    watcher: Option<RecommendedWatcher>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    state: watch::Sender<WatchState>,
    rewatch_interval: Duration,
}

impl WatchLoop {
    async fn run(mut self) {
        while let Some(loss) = self.process_until_lost().await {
            self.watcher = None;
            error!(
                path = %self.engine.path().display(),
                reason = %loss.reason,
                file_gone = loss.file_gone,
                "Lost watch on log file, live updates paused"
            );
            if loss.file_gone {
                self.engine.rewind().await;
            }
            self.state.send_replace(WatchState::Lost {
                reason: loss.reason,
            });

            self.rearm().await;
        }

        debug!("Watch task shutting down");
    }

    /// Runs change cycles until the watch is lost.
    ///
    /// Returns why the watch was lost, or `None` if the channel closed.
    async fn process_until_lost(&mut self) -> Option<Loss> {
        while let Some(first) = self.internal_rx.recv().await {
            let mut lost = None;
            let mut coalesced = 0usize;

            for event in std::iter::once(first).chain(std::iter::from_fn(|| {
                self.internal_rx.try_recv().ok()
            })) {
                match event {
                    InternalEvent::Changed => coalesced += 1,
                    InternalEvent::Lost(loss) => lost = Some(loss),
                }
            }

            if let Some(loss) = lost {
                return Some(loss);
            }

            trace!(coalesced, "Running change cycle");
            match self.engine.on_change().await {
                Ok(outcome) => trace!(?outcome, "Change cycle complete"),
                Err(err) if err.is_not_found() => return Some(Loss::file_gone(err.to_string())),
                Err(err) => warn!(error = %err, "Change cycle failed, retrying on next event"),
            }
        }

        None
    }

    /// Retries the watch until the file can be watched again.
    async fn rearm(&mut self) {
        let path = self.engine.path().to_path_buf();

        loop {
            tokio::time::sleep(self.rewatch_interval).await;

            if !path.exists() {
                trace!(path = %path.display(), "Log file still missing");
                continue;
            }

            match create_watcher(&path, self.internal_tx.clone()) {
                Ok(watcher) => {
                    self.watcher = Some(watcher);
                    break;
                }
                Err(err) => debug!(error = %err, "Re-arming watch failed"),
            }
        }

        // Drop anything queued by the old watcher.
        while self.internal_rx.try_recv().is_ok() {}

        self.state.send_replace(WatchState::Watching);
        info!(path = %path.display(), "Watch on log file re-established");

        if let Err(err) = self.engine.on_change().await {
            warn!(error = %err, "Change cycle after re-arming failed");
        }
    }
}
