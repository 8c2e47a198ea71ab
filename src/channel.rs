//! Ordered, unbounded event channel.
//!
//! A thin wrapper over [`tokio::sync::mpsc::unbounded_channel`] that names
//! the two operations the session needs: [`Publisher::publish`] never blocks,
//! and [`Subscriber::take`] suspends until the next item in publish order is
//! available. Each session owns two independent instances: outbound events
//! and inbound replies.

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::event::{Inbound, OutboundEvent};

/// Producer half of an event channel.
#[derive(Debug)]
pub struct Publisher<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Consumer half of an event channel.
#[derive(Debug)]
pub struct Subscriber<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

/// Create a connected publisher/subscriber pair.
#[must_use]
pub fn event_channel<T>() -> (Publisher<T>, Subscriber<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, Subscriber { rx })
}

impl<T> Publisher<T> {
    /// Enqueue `item`. Ownership moves into the channel.
    ///
    /// Returns `false` when the subscriber is gone; the item is dropped.
    pub fn publish(&self, item: T) -> bool {
        if self.tx.send(item).is_err() {
            debug!("event channel closed; item dropped");
            return false;
        }
        true
    }

    /// Whether the subscriber has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve once the subscriber has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

impl<T> Subscriber<T> {
    /// Wait for the next item.
    ///
    /// Returns `None` once every publisher is dropped and the queue is empty.
    pub async fn take(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next item only if one is already queued.
    pub fn try_take(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Publisher of outbound client events.
pub type EventPublisher = Publisher<OutboundEvent>;
/// Subscriber of outbound client events.
pub type EventSubscriber = Subscriber<OutboundEvent>;
/// Publisher of inbound replies and control signals.
pub type ReplyPublisher = Publisher<Inbound>;
/// Subscriber of inbound replies and control signals.
pub type ReplySubscriber = Subscriber<Inbound>;
