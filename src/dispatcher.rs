//! The event dispatcher (component C): matches each incoming event against
//! the handler registry and runs the winning handler on the connection's
//! executor, isolated from the read loop and from other handlers.
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::codec::Event;
use crate::registry::{Handler, HandlerKey, Registry};

#[derive(Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Dispatcher {
        Dispatcher {
            registry: Arc::new(Mutex::new(Registry::new())),
        }
    }

    pub(crate) fn register(&self, key: HandlerKey, handler: Handler) {
        self.registry.lock().unwrap().register(key, handler);
    }

    pub(crate) fn unregister(&self, key: &HandlerKey) {
        self.registry.lock().unwrap().unregister(key);
    }

    /// Removes every registered handler.
    pub(crate) fn clear_all(&self) {
        self.registry.lock().unwrap().clear();
    }

    /// Drives the dispatch loop until `events_rx` closes (the connection's
    /// multiplexer has shut down). This is the connection's one dedicated
    /// dispatch worker: each event's matching handler is awaited to
    /// completion before the next event is even looked up, so handler
    /// invocation order always matches arrival order. A handler that
    /// panics is caught and logged here rather than taking the whole loop
    /// down with it.
    pub(crate) async fn run(self, mut events_rx: mpsc::Receiver<Event>) {
        while let Some(event) = events_rx.recv().await {
            let handler = self.registry.lock().unwrap().lookup(&event);
            match handler {
                Some(handler) => {
                    let name = event.name().map(|s| s.to_owned());
                    tracing::trace!(event_name = ?name, "dispatching event");
                    let outcome = std::panic::AssertUnwindSafe(handler(event)).catch_unwind().await;
                    if outcome.is_err() {
                        tracing::warn!(event_name = ?name, "event handler panicked");
                    }
                }
                None => {
                    tracing::trace!(event_name = ?event.name(), "no handler registered for event");
                }
            }
        }
    }
}
