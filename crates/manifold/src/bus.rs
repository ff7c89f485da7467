//! The public bus surface.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::BusConfig;
use crate::dispatch::Dispatch;
use crate::error::{BusError, ErrorSink, ErrorSinks};
use crate::handler::Listener;
use crate::message::Envelope;
use crate::pool::{AsyncPool, Publication};
use crate::subscription::SubscriptionRegistry;

/// In-process publish/subscribe bus with type-hierarchy dispatch.
///
/// Listeners register handler methods through the [`Listener`] trait;
/// publishers post one, two, three, or arbitrarily many values, and every
/// handler whose declared parameter tuple is compatible fires. Delivery is
/// synchronous on the calling thread or asynchronous through a fixed worker
/// pool; publications matching no handler fall back to
/// [`DeadMessage`](crate::DeadMessage) subscriptions.
///
/// Busses are self-contained: every instance carries its own registry,
/// caches, and workers, and instances are fully independent.
///
/// # Example
///
/// ```
/// use std::any::Any;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use manifold::{impl_message, Handler, Listener, MessageBus};
///
/// struct Tick(u64);
/// impl_message!(static TICK: Tick);
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl Listener for Counter {
///     fn handlers(&self) -> Vec<Handler> {
///         vec![Handler::one(|counter: &Counter, _tick: &Tick| {
///             counter.0.fetch_add(1, Ordering::SeqCst);
///             Ok(())
///         })]
///     }
///
///     fn as_any(&self) -> &(dyn Any + Send + Sync) {
///         self
///     }
/// }
///
/// let bus = MessageBus::new().unwrap();
/// let counter = Arc::new(Counter::default());
/// bus.subscribe(counter.clone());
/// bus.publish(Tick(1));
/// assert_eq!(counter.0.load(Ordering::SeqCst), 1);
/// bus.shutdown();
/// ```
pub struct MessageBus {
    registry: Arc<SubscriptionRegistry>,
    dispatch: Arc<Dispatch>,
    pool: AsyncPool,
    sinks: Arc<ErrorSinks>,
    shut_down: AtomicBool,
}

impl MessageBus {
    /// Creates a bus with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SpawnFailed`] when a dispatch worker cannot be
    /// started.
    pub fn new() -> Result<Self, BusError> {
        Self::with_config(BusConfig::default())
    }

    /// Creates a bus from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidConfig`] for out-of-range settings and
    /// [`BusError::SpawnFailed`] when a dispatch worker cannot be started.
    pub fn with_config(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;

        let sinks = Arc::new(ErrorSinks::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatch = Arc::new(Dispatch::new(
            Arc::clone(&registry),
            Arc::clone(&sinks),
            config.dispatch_mode,
        ));
        let pool = AsyncPool::start(
            config.workers,
            config.queue_capacity,
            Arc::clone(&dispatch),
            Arc::clone(&sinks),
        )?;

        Ok(Self {
            registry,
            dispatch,
            pool,
            sinks,
            shut_down: AtomicBool::new(false),
        })
    }

    /// The subscription registry backing this bus.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // --- subscription ---

    /// Binds every handler of the listener's class to this instance.
    pub fn subscribe(&self, listener: Arc<dyn Listener>) {
        self.registry.subscribe(listener);
    }

    /// Unbinds the instance. Unknown instances are a no-op.
    pub fn unsubscribe(&self, listener: Arc<dyn Listener>) {
        self.registry.unsubscribe(&listener);
    }

    /// Registers a sink for out-of-band publication errors. With no sink
    /// registered, errors are logged.
    pub fn add_error_handler(&self, sink: Arc<dyn ErrorSink>) {
        self.sinks.add(sink);
    }

    // --- synchronous publish ---

    /// Publishes one value on the calling thread.
    pub fn publish<M: Into<Envelope>>(&self, message: M) {
        self.dispatch.publish(message.into());
    }

    /// Publishes a two-value tuple on the calling thread.
    pub fn publish2<A, B>(&self, m1: A, m2: B)
    where
        A: Into<Envelope>,
        B: Into<Envelope>,
    {
        self.dispatch.publish2(m1.into(), m2.into());
    }

    /// Publishes a three-value tuple on the calling thread.
    pub fn publish3<A, B, C>(&self, m1: A, m2: B, m3: C)
    where
        A: Into<Envelope>,
        B: Into<Envelope>,
        C: Into<Envelope>,
    {
        self.dispatch.publish3(m1.into(), m2.into(), m3.into());
    }

    /// Publishes an arbitrary tuple on the calling thread. Past three
    /// values, only exact tuple and same-type variadic matching apply.
    pub fn publish_many(&self, messages: Vec<Envelope>) {
        self.dispatch.publish_many(messages);
    }

    // --- asynchronous publish ---

    /// Enqueues one value for worker delivery, blocking while the dispatch
    /// queue is saturated.
    pub fn publish_async<M: Into<Envelope>>(&self, message: M) {
        self.pool.publish(Publication::One(message.into()));
    }

    /// Enqueues a two-value tuple for worker delivery.
    pub fn publish_async2<A, B>(&self, m1: A, m2: B)
    where
        A: Into<Envelope>,
        B: Into<Envelope>,
    {
        self.pool.publish(Publication::Two(m1.into(), m2.into()));
    }

    /// Enqueues a three-value tuple for worker delivery.
    pub fn publish_async3<A, B, C>(&self, m1: A, m2: B, m3: C)
    where
        A: Into<Envelope>,
        B: Into<Envelope>,
        C: Into<Envelope>,
    {
        self.pool
            .publish(Publication::Three(m1.into(), m2.into(), m3.into()));
    }

    /// Enqueues an arbitrary tuple for worker delivery.
    pub fn publish_many_async(&self, messages: Vec<Envelope>) {
        self.pool.publish(Publication::Many(messages));
    }

    /// Like [`publish_async`](Self::publish_async), but waits at most
    /// `timeout` for queue space; on timeout the publication is dropped and
    /// reported to the error sinks.
    pub fn publish_async_timeout<M: Into<Envelope>>(&self, timeout: Duration, message: M) {
        self.pool
            .publish_timeout(timeout, Publication::One(message.into()));
    }

    /// Timed two-value asynchronous publish.
    pub fn publish_async2_timeout<A, B>(&self, timeout: Duration, m1: A, m2: B)
    where
        A: Into<Envelope>,
        B: Into<Envelope>,
    {
        self.pool
            .publish_timeout(timeout, Publication::Two(m1.into(), m2.into()));
    }

    /// Timed three-value asynchronous publish.
    pub fn publish_async3_timeout<A, B, C>(&self, timeout: Duration, m1: A, m2: B, m3: C)
    where
        A: Into<Envelope>,
        B: Into<Envelope>,
        C: Into<Envelope>,
    {
        self.pool
            .publish_timeout(timeout, Publication::Three(m1.into(), m2.into(), m3.into()));
    }

    /// Timed arbitrary-tuple asynchronous publish.
    pub fn publish_many_async_timeout(&self, timeout: Duration, messages: Vec<Envelope>) {
        self.pool
            .publish_timeout(timeout, Publication::Many(messages));
    }

    // --- lifecycle ---

    /// Whether the asynchronous dispatch queue holds undelivered
    /// publications.
    #[must_use]
    pub fn has_pending_messages(&self) -> bool {
        self.pool.has_pending()
    }

    /// Stops the worker pool and releases every subscription. Idempotent;
    /// also invoked on drop.
    ///
    /// After shutdown, asynchronous publishes are rejected through the
    /// error sinks and synchronous publishes match nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.shutdown();
        self.registry.clear();
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("registry", &self.registry)
            .field("dispatch", &self.dispatch)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
