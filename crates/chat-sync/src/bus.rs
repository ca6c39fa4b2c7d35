//! Typed publish/subscribe bus for server events.
//!
//! Dispatch is synchronous: [`EventBus::publish`] runs every handler
//! subscribed to the event's kind, in subscription order, before it
//! returns. A handler that fails or panics is logged and skipped; the
//! handlers after it still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chat_core::{EventKind, ServerEvent};
use tracing::{debug, error, warn};

use crate::lock;

/// Error a handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscribed event handler.
pub type Handler = Arc<dyn Fn(&ServerEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Per-kind ordered handler lists.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for one event kind.
    ///
    /// Subscribing the same closure twice yields two entries, each invoked.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServerEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("Subscribed {:?} to {}", id, kind);
        id
    }

    /// Remove a handler. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = lock(&self.handlers);
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Deliver an event to its handlers. Returns how many completed without
    /// error.
    pub fn publish(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers can subscribe or unsubscribe while running.
        let handlers: Vec<(SubscriptionId, Handler)> = match lock(&self.handlers).get(&kind) {
            Some(list) => list.clone(),
            None => {
                debug!("No handlers for {}", kind);
                return 0;
            }
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Handler {:?} for {} failed: {}", id, kind, e),
                Err(_) => error!("Handler {:?} for {} panicked", id, kind),
            }
        }
        delivered
    }

    /// Number of handlers subscribed to a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.handlers).get(&kind).map_or(0, Vec::len)
    }
}
