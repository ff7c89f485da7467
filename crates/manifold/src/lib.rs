//! # manifold
//!
//! An in-process publish/subscribe message bus with type-hierarchy
//! dispatch.
//!
//! Listener objects register handler methods through the [`Listener`]
//! trait; publishers post one, two, three, or variadic message values, and
//! the bus invokes every handler whose declared parameter tuple is
//! compatible with the posted one.
//!
//! | Area            | Description                                                   | Key types                             |
//! |-----------------|---------------------------------------------------------------|---------------------------------------|
//! | **Hierarchy**   | Declared type graph with a memoized supertype oracle.         | [`TypeInfo`], [`TypeHierarchy`]       |
//! | **Messages**    | Erased posted values, arrays, dead letters.                   | [`Message`], [`Envelope`], [`DeadMessage`] |
//! | **Handlers**    | Per-method metadata and typed invoker constructors.           | [`Handler`], [`Listener`]             |
//! | **Registry**    | Class/type/tuple indices with cleared-on-write match caches.  | [`SubscriptionRegistry`], [`Subscription`] |
//! | **Bus**         | Sync and async publication, dead letters, error sinks.        | [`MessageBus`], [`BusConfig`]         |
//!
//! ## Matching model
//!
//! A publication expands into three disjoint buckets, processed in order:
//!
//! 1. **Exact**: handlers declaring the posted runtime type (or tuple)
//!    verbatim.
//! 2. **Super**: handlers declaring a strict supertype that opted in with
//!    `accepts_subtypes`.
//! 3. **VarArg**: handlers declaring `T[]` that opted in with
//!    `accepts_varargs`; single values arrive as synthesized one-element
//!    arrays, posted arrays arrive as-is.
//!
//! When no bucket matches, the tuple is wrapped in a [`DeadMessage`] and
//! delivered to handlers declared exactly on it.
//!
//! ## Example
//!
//! ```
//! use std::any::Any;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use manifold::{impl_message, Handler, Listener, Message, MessageBus};
//!
//! struct Event(&'static str);
//! struct UserEvent(&'static str);
//!
//! impl_message!(static EVENT: Event);
//! impl_message!(static USER_EVENT: UserEvent, extends [EVENT]);
//!
//! #[derive(Default)]
//! struct Audit(AtomicUsize);
//!
//! impl Listener for Audit {
//!     fn handlers(&self) -> Vec<Handler> {
//!         vec![
//!             // Fires for Event and every subtype of it.
//!             Handler::one_with_subtypes(&EVENT, |audit: &Audit, _: &dyn Message| {
//!                 audit.0.fetch_add(1, Ordering::SeqCst);
//!                 Ok(())
//!             }),
//!         ]
//!     }
//!
//!     fn as_any(&self) -> &(dyn Any + Send + Sync) {
//!         self
//!     }
//! }
//!
//! let bus = MessageBus::new().unwrap();
//! let audit = Arc::new(Audit::default());
//! bus.subscribe(audit.clone());
//!
//! bus.publish(Event("boot"));
//! bus.publish(UserEvent("login"));
//! assert_eq!(audit.0.load(Ordering::SeqCst), 2);
//! bus.shutdown();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Unsafe is confined to the lock-free dispatch queue.
#![allow(unsafe_code)]

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod hierarchy;
pub mod message;
pub mod subscription;

mod dispatch;
mod pool;

pub use bus::MessageBus;
pub use config::{BusConfig, BusConfigBuilder, DispatchMode};
pub use error::{BusError, ErrorSink, PublicationError};
pub use handler::{Handler, HandlerError, HandlerResult, Listener};
pub use hierarchy::{MessageType, TypeHierarchy, TypeInfo};
pub use message::{DeadMessage, Envelope, Message, MessageArray};
pub use subscription::{Subscription, SubscriptionList, SubscriptionRegistry};
