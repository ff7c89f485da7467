//! Error reporting: publication errors, sinks, and bus-level failures.
//!
//! Nothing that goes wrong during delivery propagates to the publisher.
//! Handler failures, enqueue timeouts, and post-shutdown rejections are
//! packaged as [`PublicationError`]s and fanned out to every registered
//! [`ErrorSink`]; with no sink registered they are logged through `tracing`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::handler::HandlerError;
use crate::message::Envelope;

// ---------------------------------------------------------------------------
// BusError
// ---------------------------------------------------------------------------

/// Failures constructing or starting a bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A dispatch worker thread could not be spawned.
    #[error("failed to spawn dispatch worker {worker_id}: {message}")]
    SpawnFailed {
        /// Index of the worker that failed to start.
        worker_id: usize,
        /// Underlying spawn error.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// PublicationError
// ---------------------------------------------------------------------------

/// An error raised while delivering (or failing to deliver) a publication.
#[derive(Debug)]
pub struct PublicationError {
    message: &'static str,
    cause: Option<HandlerError>,
    published: Vec<Envelope>,
}

impl PublicationError {
    pub(crate) fn new(
        message: &'static str,
        cause: Option<HandlerError>,
        published: Vec<Envelope>,
    ) -> Self {
        Self {
            message,
            cause,
            published,
        }
    }

    pub(crate) fn handler_failure(cause: HandlerError, published: &[Envelope]) -> Self {
        Self::new("handler invocation failed", Some(cause), published.to_vec())
    }

    /// Short description of what went wrong.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message
    }

    /// The underlying failure, when one exists.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.cause.as_deref()
    }

    /// The tuple whose publication raised the error, in posting order.
    #[must_use]
    pub fn published(&self) -> &[Envelope] {
        &self.published
    }
}

impl fmt::Display for PublicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause}", self.message),
            None => f.write_str(self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorSink
// ---------------------------------------------------------------------------

/// Receives publication errors out-of-band.
pub trait ErrorSink: Send + Sync {
    /// Called once per error, after delivery to prior sinks.
    fn handle(&self, error: &PublicationError);
}

/// Registered sinks, fanned out in registration order.
pub(crate) struct ErrorSinks {
    sinks: RwLock<Vec<Arc<dyn ErrorSink>>>,
}

impl ErrorSinks {
    pub(crate) fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, sink: Arc<dyn ErrorSink>) {
        self.sinks.write().push(sink);
    }

    /// Delivers `error` to every sink; logs when none are registered.
    pub(crate) fn report(&self, error: &PublicationError) {
        let sinks = self.sinks.read().clone();
        if sinks.is_empty() {
            tracing::error!(%error, published = error.published().len(), "publication error");
            return;
        }
        for sink in &sinks {
            sink.handle(error);
        }
    }
}

impl fmt::Debug for ErrorSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSinks")
            .field("registered", &self.sinks.read().len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
