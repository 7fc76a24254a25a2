use crate::error::{LavalinkError, Result};
use crate::event::{remove_from_weak, HandlerId, HandlerList};
use std::sync::Weak;
use tokio::sync::broadcast;

/// Channel-backed subscription to an [`EventBroadcaster`](crate::EventBroadcaster)
///
/// Created by `EventBroadcaster::subscribe`. Dropping the receiver removes its
/// handler from the broadcaster.
pub struct EventReceiver<T> {
    rx: broadcast::Receiver<T>,
    id: HandlerId,
    handlers: Weak<HandlerList<T>>,
}

impl<T: Clone> EventReceiver<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>, id: HandlerId, handlers: Weak<HandlerList<T>>) -> Self {
        Self { rx, id, handlers }
    }

    /// Receive the next event
    ///
    /// Returns `ConnectionClosed` once the broadcaster has been dropped, and
    /// `Lagged` once after events were lost to a full buffer.
    pub async fn recv(&mut self) -> Result<T> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => LavalinkError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => LavalinkError::Lagged(n),
        })
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(LavalinkError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(LavalinkError::Lagged(n)),
        }
    }

    /// Id of the handler feeding this receiver
    pub fn handler_id(&self) -> HandlerId {
        self.id
    }
}

impl<T> Drop for EventReceiver<T> {
    fn drop(&mut self) {
        remove_from_weak(&self.handlers, self.id);
    }
}
