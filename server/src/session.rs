//! Per-connection subscriber sessions.
//!
//! A [`Session`] ties one WebSocket connection to the [`TailEngine`]. Opening a
//! session attaches a fresh subscriber queue: the connection receives the
//! snapshot first and live deltas afterwards, in that order, through the
//! returned receiver.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting -> Snapshotting -> Live -> Closed
//! ```
//!
//! `Closed` is terminal. A reconnecting client opens a new session and gets a
//! new snapshot; nothing is resumed.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::broadcast::{SubscriberHandle, SubscriberId};
use crate::engine::TailEngine;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake complete, not yet attached.
    Connecting,
    /// Snapshot being read and enqueued.
    Snapshotting,
    /// Receiving live deltas.
    Live,
    /// Unregistered from the hub.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Snapshotting => "snapshotting",
            Self::Live => "live",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One subscriber connection attached to the engine.
///
/// Dropping a session closes it.
#[derive(Debug)]
pub struct Session {
    engine: Arc<TailEngine>,
    id: Option<SubscriberId>,
    state: SessionState,
}

impl Session {
    /// Attaches a new subscriber to `engine`.
    ///
    /// Returns the session together with the receiving half of its queue. The
    /// snapshot, when non-empty, is already waiting in the queue.
    pub async fn open(
        engine: Arc<TailEngine>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let mut session = Self {
            engine,
            id: None,
            state: SessionState::Connecting,
        };

        session.transition(SessionState::Snapshotting);
        let id = session.engine.attach(SubscriberHandle::new(tx)).await;
        session.id = Some(id);
        session.transition(SessionState::Live);

        info!(
            subscriber_id = %id,
            subscriber_count = session.engine.hub().subscriber_count(),
            "Subscriber session live"
        );

        (session, rx)
    }

    /// The hub identifier, once attached.
    #[must_use]
    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Unregisters from the hub. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(id) = self.id {
            let removed = self.engine.detach(id);
            info!(
                subscriber_id = %id,
                already_removed = !removed,
                subscriber_count = self.engine.hub().subscriber_count(),
                "Subscriber session closed"
            );
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state change");
        self.state = next;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
