//! Fan-out of one event to many independently failing handlers.
//!
//! Handlers run sequentially in registration order. A handler that returns an
//! error or panics is reported to the broadcaster's [`ErrorHandler`] and the
//! remaining handlers still see the event.

use crate::subscription::EventReceiver;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Error returned by an event handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Sink for handler failures; receives the event name and the error
pub type ErrorHandler = Arc<dyn Fn(&'static str, &HandlerError) + Send + Sync>;

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

pub(crate) type HandlerList<T> = Mutex<Vec<(HandlerId, Handler<T>)>>;

/// Token identifying a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error sink used when none is supplied: logs through `tracing`
pub fn log_handler_error(event: &'static str, error: &HandlerError) {
    tracing::error!(event_name = event, "Event handler failed: {}", error);
}

/// Default error sink as an [`ErrorHandler`]
pub fn default_error_handler() -> ErrorHandler {
    Arc::new(log_handler_error)
}

/// Events buffered per channel subscription before the oldest are dropped
pub const SUBSCRIPTION_CAPACITY: usize = 128;

/// Registry of handlers for one kind of event
pub struct EventBroadcaster<T> {
    name: &'static str,
    handlers: Arc<HandlerList<T>>,
    error_handler: ErrorHandler,
}

impl<T: Clone + Send + 'static> EventBroadcaster<T> {
    /// Create a broadcaster; `name` identifies it in error reports
    pub fn new(name: &'static str, error_handler: ErrorHandler) -> Self {
        Self {
            name,
            handlers: Arc::new(Mutex::new(Vec::new())),
            error_handler,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register an async handler
    pub fn register<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        let boxed: Handler<T> = Arc::new(move |event: T| handler(event).boxed());
        lock(&self.handlers).push((id, boxed));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn unregister(&self, id: HandlerId) -> bool {
        remove_handler(&self.handlers, id)
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    /// Receive events through a channel instead of a callback
    ///
    /// At most [`SUBSCRIPTION_CAPACITY`] events are buffered. A receiver that
    /// falls further behind loses the oldest ones and its next receive reports
    /// [`LavalinkError::Lagged`](crate::LavalinkError::Lagged). The receiver
    /// unregisters itself when dropped.
    pub fn subscribe(&self) -> EventReceiver<T> {
        let (tx, rx) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let id = self.register(move |event: T| {
            // No receiver means it is being dropped.
            let _ = tx.send(event);
            async { Ok(()) }
        });
        EventReceiver::new(rx, id, Arc::downgrade(&self.handlers))
    }

    /// Deliver an event to every handler registered at the time of the call
    pub async fn broadcast(&self, event: T) {
        let handlers: Vec<_> = lock(&self.handlers).clone();

        for (id, handler) in handlers {
            let invoked = panic::catch_unwind(AssertUnwindSafe(|| handler(event.clone())));
            let outcome = match invoked {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            let error: HandlerError = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(panic) => format!("handler {} panicked: {}", id, panic_message(&*panic)).into(),
            };
            (self.error_handler)(self.name, &error);
        }
    }
}

pub(crate) fn remove_handler<T>(handlers: &HandlerList<T>, id: HandlerId) -> bool {
    let mut handlers = lock(handlers);
    let before = handlers.len();
    handlers.retain(|(existing, _)| *existing != id);
    handlers.len() != before
}

pub(crate) fn remove_from_weak<T>(handlers: &Weak<HandlerList<T>>, id: HandlerId) {
    if let Some(handlers) = handlers.upgrade() {
        remove_handler(&handlers, id);
    }
}

fn lock<T>(handlers: &HandlerList<T>) -> MutexGuard<'_, Vec<(HandlerId, Handler<T>)>> {
    handlers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn capture() -> (ErrorHandler, Arc<StdMutex<Vec<(String, String)>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ErrorHandler = Arc::new(move |event: &'static str, error: &HandlerError| {
            sink.lock().unwrap().push((event.to_string(), error.to_string()));
        });
        (handler, seen)
    }

    fn recorder(
        log: &Arc<StdMutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(u32) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync + 'static {
        let log = log.clone();
        move |event| {
            log.lock().unwrap().push(format!("{}:{}", label, event));
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test]
    async fn delivers_in_registration_order() {
        let (errors, _) = capture();
        let broadcaster = EventBroadcaster::<u32>::new("TEST", errors);
        let log = Arc::new(StdMutex::new(Vec::new()));

        broadcaster.register(recorder(&log, "a"));
        broadcaster.register(recorder(&log, "b"));
        broadcaster.register(recorder(&log, "c"));
        broadcaster.broadcast(1).await;

        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1", "c:1"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_siblings() {
        let (errors, seen) = capture();
        let broadcaster = EventBroadcaster::<u32>::new("TEST_EVENT", errors);
        let log = Arc::new(StdMutex::new(Vec::new()));

        broadcaster.register(recorder(&log, "first"));
        broadcaster.register(|_| async { Err::<(), HandlerError>("boom".into()) });
        broadcaster.register(|_: u32| -> BoxFuture<'static, Result<(), HandlerError>> {
            panic!("kaboom")
        });
        broadcaster.register(|_| async {
            if true {
                panic!("async kaboom");
            }
            Ok(())
        });
        broadcaster.register(recorder(&log, "last"));
        broadcaster.broadcast(7).await;

        assert_eq!(*log.lock().unwrap(), vec!["first:7", "last:7"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(event, _)| event == "TEST_EVENT"));
        assert_eq!(seen[0].1, "boom");
        assert!(seen[1].1.contains("kaboom"));
        assert!(seen[2].1.contains("async kaboom"));
    }

    #[tokio::test]
    async fn unregistered_handler_is_skipped() {
        let (errors, _) = capture();
        let broadcaster = EventBroadcaster::<u32>::new("TEST", errors);
        let log = Arc::new(StdMutex::new(Vec::new()));

        let a = broadcaster.register(recorder(&log, "a"));
        broadcaster.register(recorder(&log, "b"));
        assert!(broadcaster.unregister(a));
        assert!(!broadcaster.unregister(a));
        broadcaster.broadcast(2).await;

        assert_eq!(*log.lock().unwrap(), vec!["b:2"]);
        assert_eq!(broadcaster.handler_count(), 1);
    }

    #[tokio::test]
    async fn removal_mid_broadcast_keeps_event_in_flight() {
        let (errors, _) = capture();
        let broadcaster = Arc::new(EventBroadcaster::<u32>::new("TEST", errors));
        let log = Arc::new(StdMutex::new(Vec::new()));

        let victim = Arc::new(StdMutex::new(None));
        let remover = {
            let broadcaster = Arc::downgrade(&broadcaster);
            let victim = victim.clone();
            move |_: u32| {
                if let (Some(b), Some(id)) = (broadcaster.upgrade(), *victim.lock().unwrap()) {
                    b.unregister(id);
                }
                async { Ok(()) }
            }
        };
        broadcaster.register(remover);
        let id = broadcaster.register(recorder(&log, "victim"));
        *victim.lock().unwrap() = Some(id);

        broadcaster.broadcast(1).await;
        broadcaster.broadcast(2).await;

        assert_eq!(*log.lock().unwrap(), vec!["victim:1"]);
    }

    #[tokio::test]
    async fn subscription_receives_and_unregisters_on_drop() {
        let (errors, _) = capture();
        let broadcaster = EventBroadcaster::<u32>::new("TEST", errors);

        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.handler_count(), 1);
        broadcaster.broadcast(5).await;
        broadcaster.broadcast(6).await;
        assert_eq!(rx.recv().await.unwrap(), 5);
        assert_eq!(rx.try_recv().unwrap(), Some(6));
        assert_eq!(rx.try_recv().unwrap(), None);

        drop(rx);
        assert_eq!(broadcaster.handler_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag_and_keeps_newest() {
        let (errors, reported) = capture();
        let broadcaster = EventBroadcaster::<usize>::new("TEST", errors);
        let mut rx = broadcaster.subscribe();

        for n in 0..SUBSCRIPTION_CAPACITY + 5 {
            broadcaster.broadcast(n).await;
        }

        assert!(matches!(rx.recv().await, Err(crate::LavalinkError::Lagged(5))));
        assert_eq!(rx.recv().await.unwrap(), 5);
        assert!(reported.lock().unwrap().is_empty());

        drop(broadcaster);
        for _ in 6..SUBSCRIPTION_CAPACITY + 5 {
            rx.try_recv().unwrap();
        }
        assert!(matches!(rx.try_recv(), Err(crate::LavalinkError::ConnectionClosed)));
    }
}
