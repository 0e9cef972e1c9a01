//! Listener registration and fan-out for typed notifications.
//!
//! Every live [`Subscription`] gets its own copy of each message published
//! after it was created, in publish order. Adding a listener never displaces
//! an existing one. Nothing is persisted here: a listener that subscribes late
//! only sees what comes next, and durable state stays in the offline store.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

/// One listener's view of a bus.
///
/// Drained by a single consumer; dropping it detaches the listener the next
/// time something is published.
#[derive(Debug)]
pub struct Subscription<M> {
    inbox: Receiver<M>,
}

impl<M> Subscription<M> {
    pub(crate) fn from_receiver(inbox: Receiver<M>) -> Self {
        Self { inbox }
    }

    /// Next buffered message, if one is waiting.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.inbox.try_recv()
    }

    /// Wait up to `wait` for the next message. `None` on timeout or when the
    /// bus is gone.
    pub fn next_within(&self, wait: Duration) -> Option<M> {
        self.inbox.recv_timeout(wait).ok()
    }

    /// Everything buffered so far, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.inbox.try_iter().collect()
    }
}

/// Pub/sub over a message type `M`.
///
/// A failed publish means some listener missed a notification. The offline
/// pipeline tolerates that since status counts are re-read from the store.
pub trait EventBus<M>: Send + Sync {
    type Error: std::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        B::publish(self, message)
    }

    fn subscribe(&self) -> Subscription<M> {
        B::subscribe(self)
    }
}
