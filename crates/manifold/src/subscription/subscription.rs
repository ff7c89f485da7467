//! One subscription per (listener class, handler method) pair.

use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorSinks, PublicationError};
use crate::handler::{Handler, Listener};
use crate::message::Envelope;

use super::listener_set::ListenerSet;

/// Unites a handler with the listener instances currently bound to it.
///
/// Subscriptions are created once per (listener class, handler method) and
/// retained by the registry for the process lifetime; subscribing another
/// instance of a known class only touches the listener set.
pub struct Subscription {
    handler: Handler,
    listeners: ListenerSet,
}

impl Subscription {
    pub(crate) fn new(handler: Handler) -> Self {
        Self {
            handler,
            listeners: ListenerSet::new(),
        }
    }

    /// The handler metadata behind this subscription.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Number of currently-bound listener instances.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn subscribe(&self, listener: Arc<dyn Listener>) {
        self.listeners.add(listener);
    }

    pub(crate) fn unsubscribe(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Invokes the handler once per bound listener over a consistent
    /// snapshot. Failures go to the sinks; delivery to the remaining
    /// listeners continues.
    pub(crate) fn publish(&self, args: &[Envelope], sinks: &ErrorSinks) {
        for listener in self.listeners.snapshot().iter() {
            if let Err(cause) = self.handler.invoke(listener.as_ref(), args) {
                sinks.report(&PublicationError::handler_failure(cause, args));
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handler", &self.handler)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
