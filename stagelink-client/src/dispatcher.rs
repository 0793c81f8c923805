//! Event dispatch by message kind.
//!
//! Inbound frames without a request identifier are events. Each message kind
//! has at most one handler; registering a handler for a kind that already has
//! one replaces it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::protocol::Frame;

/// Handler invoked for inbound events of a registered kind.
pub(crate) type EventHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Routes inbound event frames to registered handlers by message kind.
#[derive(Default)]
pub(crate) struct EventDispatcher {
    handlers: RwLock<HashMap<String, EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any existing handler.
    pub fn set_handler(&self, kind: &str, handler: EventHandler) {
        if self
            .handlers
            .write()
            .insert(kind.to_string(), handler)
            .is_some()
        {
            debug!(kind = %kind, "Replaced event handler");
        }
    }

    /// Dispatches `frame` to the handler registered for its kind.
    ///
    /// Events of an unregistered kind are dropped with a debug log.
    pub fn dispatch(&self, frame: &Frame) {
        // Clone the handler out so it runs without the table lock held; a
        // handler may itself register handlers.
        let handler = self.handlers.read().get(&frame.kind).cloned();
        match handler {
            Some(handler) => handler(frame),
            None => debug!(kind = %frame.kind, "No handler for event kind"),
        }
    }

    /// Returns true if a handler is registered for `kind`.
    #[cfg(test)]
    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.read().contains_key(kind)
    }
}
