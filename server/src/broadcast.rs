//! Subscriber registry and fan-out for log payloads.
//!
//! This module provides the distribution mechanism that pushes log payloads to
//! every live subscriber. Each subscriber is represented by the sending half
//! of its own bounded queue; the connection task on the other side drains the
//! queue into the WebSocket. The hub never awaits a subscriber, so one slow
//! client cannot delay delivery to the others.
//!
//! # Architecture
//!
//! - [`BroadcastHub`] - The registry keyed by [`SubscriberId`]
//! - [`SubscriberHandle`] - The hub's side of one subscriber queue
//!
//! # Example
//!
//! ```rust
//! use logtail_server::broadcast::{BroadcastHub, SubscriberHandle};
//! use tokio::sync::mpsc;
//!
//! let hub = BroadcastHub::new();
//!
//! let (tx, mut rx) = mpsc::channel(8);
//! let id = hub.register(SubscriberHandle::new(tx));
//!
//! assert_eq!(hub.broadcast("a\n\nb"), 1);
//! assert_eq!(rx.try_recv().unwrap(), "a\n\nb");
//!
//! assert!(hub.unregister(id));
//! assert_eq!(hub.subscriber_count(), 0);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Identifier of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a payload could not be handed to a subscriber.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber's connection is gone.
    #[error("subscriber queue is closed")]
    Closed,

    /// The subscriber stopped draining its queue.
    #[error("subscriber queue is full")]
    Full,
}

/// The hub's side of a subscriber's outbound queue.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    queue: mpsc::Sender<String>,
}

impl SubscriberHandle {
    /// Wraps the sending half of a subscriber queue.
    #[must_use]
    pub fn new(queue: mpsc::Sender<String>) -> Self {
        Self { queue }
    }

    /// Returns `true` while the receiving side is still alive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Enqueues `payload` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the connection is gone, or
    /// [`DeliveryError::Full`] if the queue has no free slot.
    pub fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        self.queue
            .try_send(payload.to_owned())
            .map_err(|err| match err {
                TrySendError::Closed(_) => DeliveryError::Closed,
                TrySendError::Full(_) => DeliveryError::Full,
            })
    }
}

/// Registry of live subscribers.
///
/// # Thread Safety
///
/// The registry is guarded by a `std::sync::Mutex` that is only held for
/// non-async sections, so the hub can be shared freely across tasks.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, SubscriberHandle>>,
}

impl BroadcastHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriberId, SubscriberHandle>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a subscriber and returns its identifier.
    pub fn register(&self, handle: SubscriberHandle) -> SubscriberId {
        let id = SubscriberId::new();
        let mut subscribers = self.subscribers();
        subscribers.insert(id, handle);
        debug!(
            subscriber_id = %id,
            subscriber_count = subscribers.len(),
            "Subscriber registered"
        );
        id
    }

    /// Removes a subscriber.
    ///
    /// Returns `false` if it was already gone, for example because a failed
    /// delivery removed it first.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!(
                subscriber_id = %id,
                subscriber_count = subscribers.len(),
                "Subscriber unregistered"
            );
        }
        removed
    }

    /// Delivers `payload` to every open subscriber.
    ///
    /// Subscribers whose delivery fails are removed; the remaining ones still
    /// receive the payload. Returns the number of successful deliveries.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut subscribers = self.subscribers();
        let mut delivered = 0;

        subscribers.retain(|id, handle| match handle.deliver(payload) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(DeliveryError::Closed) => {
                debug!(subscriber_id = %id, "Dropping disconnected subscriber");
                false
            }
            Err(DeliveryError::Full) => {
                warn!(subscriber_id = %id, "Dropping subscriber with full queue");
                false
            }
        });

        trace!(
            delivered,
            payload_len = payload.len(),
            "Broadcast complete"
        );
        delivered
    }

    /// Returns the current number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(capacity: usize) -> (SubscriberHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SubscriberHandle::new(tx), rx)
    }

    #[test]
    fn hub_new_is_empty() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn register_and_unregister_track_count() {
        let hub = BroadcastHub::new();
        let (h1, _rx1) = subscriber(4);
        let (h2, _rx2) = subscriber(4);

        let id1 = hub.register(h1);
        let id2 = hub.register(h2);
        assert_ne!(id1, id2);
        assert_eq!(hub.subscriber_count(), 2);

        assert!(hub.unregister(id1));
        assert_eq!(hub.subscriber_count(), 1);

        assert!(!hub.unregister(id1), "second unregister is a no-op");
        assert!(hub.unregister(id2));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn broadcast_with_no_subscribers_delivers_nothing() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.broadcast("line"), 0);
    }

    #[test]
    fn broadcast_reaches_every_subscriber_with_identical_content() {
        let hub = BroadcastHub::new();
        let (h1, mut rx1) = subscriber(4);
        let (h2, mut rx2) = subscriber(4);
        let (h3, mut rx3) = subscriber(4);
        hub.register(h1);
        hub.register(h2);
        hub.register(h3);

        assert_eq!(hub.broadcast("x\n\ny"), 3);

        assert_eq!(rx1.try_recv().unwrap(), "x\n\ny");
        assert_eq!(rx2.try_recv().unwrap(), "x\n\ny");
        assert_eq!(rx3.try_recv().unwrap(), "x\n\ny");
    }

    #[test]
    fn broadcast_preserves_order_per_subscriber() {
        let hub = BroadcastHub::new();
        let (handle, mut rx) = subscriber(8);
        hub.register(handle);

        hub.broadcast("first");
        hub.broadcast("second");
        hub.broadcast("third");

        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv().unwrap(), "second");
        assert_eq!(rx.try_recv().unwrap(), "third");
    }

    #[test]
    fn closed_subscriber_is_removed_without_affecting_others() {
        let hub = BroadcastHub::new();
        let (gone, gone_rx) = subscriber(4);
        let (alive, mut alive_rx) = subscriber(4);
        hub.register(gone);
        hub.register(alive);

        drop(gone_rx);

        assert_eq!(hub.broadcast("after disconnect"), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(alive_rx.try_recv().unwrap(), "after disconnect");

        assert_eq!(hub.broadcast("later"), 1);
        assert_eq!(alive_rx.try_recv().unwrap(), "later");
    }

    #[test]
    fn full_subscriber_is_removed() {
        let hub = BroadcastHub::new();
        let (slow, mut slow_rx) = subscriber(1);
        let (fast, mut fast_rx) = subscriber(8);
        hub.register(slow);
        hub.register(fast);

        assert_eq!(hub.broadcast("one"), 2);
        assert_eq!(hub.broadcast("two"), 1);
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(slow_rx.try_recv().unwrap(), "one");
        assert_eq!(fast_rx.try_recv().unwrap(), "one");
        assert_eq!(fast_rx.try_recv().unwrap(), "two");
    }

    #[test]
    fn handle_reports_open_state() {
        let (handle, rx) = subscriber(1);
        assert!(handle.is_open());
        drop(rx);
        assert!(!handle.is_open());
        assert_eq!(handle.deliver("x"), Err(DeliveryError::Closed));
    }

    #[test]
    fn handle_reports_full_queue() {
        let (handle, _rx) = subscriber(1);
        assert_eq!(handle.deliver("a"), Ok(()));
        assert_eq!(handle.deliver("b"), Err(DeliveryError::Full));
    }

    #[test]
    fn delivery_error_display() {
        assert_eq!(DeliveryError::Closed.to_string(), "subscriber queue is closed");
        assert_eq!(DeliveryError::Full.to_string(), "subscriber queue is full");
    }

    #[test]
    fn subscriber_ids_are_unique() {
        assert_ne!(SubscriberId::new(), SubscriberId::new());
    }
}
