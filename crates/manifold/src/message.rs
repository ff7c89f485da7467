//! The posted-value currency: messages, arrays, envelopes, dead letters.
//!
//! Anything published on the bus is a [`Message`] behind an [`Envelope`].
//! Message types are declared once with [`impl_message!`], which ties the
//! type to a static [`TypeInfo`] descriptor and its place in the hierarchy:
//!
//! ```
//! use manifold::impl_message;
//!
//! struct Number(f64);
//! struct Integer(i64);
//!
//! impl_message!(static NUMBER: Number);
//! impl_message!(static INTEGER: Integer, extends [NUMBER]);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::hierarchy::{MessageType, TypeInfo};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A value that can be posted on the bus.
///
/// Implemented via [`impl_message!`]; manual implementations must return the
/// same [`TypeInfo`] from both `info` and `type_info`.
pub trait Message: Send + Sync + 'static {
    /// Static descriptor for this type.
    fn info() -> &'static TypeInfo
    where
        Self: Sized;

    /// Descriptor for the concrete runtime type of this value.
    fn type_info(&self) -> &'static TypeInfo;

    /// Upcast for downcasting in typed handlers.
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

/// Declares a [`TypeInfo`] static for a type and implements [`Message`].
///
/// The optional `extends [...]` clause lists the statics of the direct
/// parent types, nearest first.
#[macro_export]
macro_rules! impl_message {
    ($(#[$meta:meta])* $vis:vis static $INFO:ident: $ty:ty) => {
        $crate::impl_message!($(#[$meta])* $vis static $INFO: $ty, extends []);
    };
    ($(#[$meta:meta])* $vis:vis static $INFO:ident: $ty:ty,
     extends [$($parent:path),* $(,)?]) => {
        $(#[$meta])*
        $vis static $INFO: $crate::TypeInfo = $crate::TypeInfo::new(
            ::core::stringify!($ty),
            ::core::any::TypeId::of::<$ty>,
            &[$(&$parent),*],
        );

        impl $crate::Message for $ty {
            fn info() -> &'static $crate::TypeInfo {
                &$INFO
            }

            fn type_info(&self) -> &'static $crate::TypeInfo {
                &$INFO
            }

            fn as_any(&self) -> &(dyn ::core::any::Any + Send + Sync) {
                self
            }
        }
    };
}

impl MessageType {
    /// The scalar key for a message type.
    #[must_use]
    pub fn of<M: Message>() -> Self {
        MessageType::Scalar(M::info())
    }

    /// The array key whose elements are `M`.
    #[must_use]
    pub fn array<M: Message>() -> Self {
        MessageType::Array(M::info())
    }
}

// ---------------------------------------------------------------------------
// MessageArray
// ---------------------------------------------------------------------------

/// An immutable ordered sequence of same-typed messages.
///
/// This is the publishable "array of T" value: posting one matches handlers
/// declared on `T[]` exactly (no rewrapping), and the dispatch core
/// synthesizes single-element arrays for variadic handlers.
#[derive(Clone)]
pub struct MessageArray {
    elem: &'static TypeInfo,
    items: Arc<[Arc<dyn Message>]>,
}

impl MessageArray {
    /// Builds an array from owned elements.
    pub fn new<M: Message>(items: impl IntoIterator<Item = M>) -> Self {
        let items: Vec<Arc<dyn Message>> = items
            .into_iter()
            .map(|item| Arc::new(item) as Arc<dyn Message>)
            .collect();
        Self {
            elem: M::info(),
            items: items.into(),
        }
    }

    /// Builds an array from already-erased elements. The caller guarantees
    /// that every element is of the `elem` type.
    pub(crate) fn from_parts(elem: &'static TypeInfo, items: Vec<Arc<dyn Message>>) -> Self {
        Self {
            elem,
            items: items.into(),
        }
    }

    /// Element type descriptor.
    #[must_use]
    pub fn elem_info(&self) -> &'static TypeInfo {
        self.elem
    }

    /// The array key for this value.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        MessageType::Array(self.elem)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `index`, erased.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&dyn Message> {
        self.items.get(index).map(AsRef::as_ref)
    }

    /// Element at `index`, downcast to its concrete type.
    #[must_use]
    pub fn get_as<M: Message>(&self, index: usize) -> Option<&M> {
        self.items.get(index)?.as_any().downcast_ref::<M>()
    }

    /// Iterates the erased elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Message> + '_ {
        self.items.iter().map(AsRef::as_ref)
    }
}

impl fmt::Debug for MessageArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageArray({}[{}])", self.elem.name(), self.items.len())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An erased posted value: a scalar message or a message array.
///
/// Cloning is cheap (`Arc` bumps); the dispatch core passes envelope slices
/// to handler invokers.
#[derive(Clone)]
pub enum Envelope {
    /// A single message value.
    Scalar(Arc<dyn Message>),
    /// An array value, matched against `T[]` declarations.
    Array(MessageArray),
}

impl Envelope {
    /// Runtime type key of the posted value.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Scalar(message) => MessageType::Scalar(message.type_info()),
            Self::Array(array) => array.message_type(),
        }
    }

    /// Descriptor of the value (element descriptor for arrays).
    #[must_use]
    pub fn type_info(&self) -> &'static TypeInfo {
        match self {
            Self::Scalar(message) => message.type_info(),
            Self::Array(array) => array.elem_info(),
        }
    }

    /// True for array values.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// The scalar message, if this is one.
    #[must_use]
    pub fn as_message(&self) -> Option<&dyn Message> {
        match self {
            Self::Scalar(message) => Some(message.as_ref()),
            Self::Array(_) => None,
        }
    }

    /// The array value, if this is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&MessageArray> {
        match self {
            Self::Scalar(_) => None,
            Self::Array(array) => Some(array),
        }
    }

    /// Downcasts a scalar envelope to a concrete message type.
    #[must_use]
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_message()?.as_any().downcast_ref::<M>()
    }

    /// Clones out the scalar `Arc`, if this is a scalar envelope.
    #[must_use]
    pub fn to_scalar(&self) -> Option<Arc<dyn Message>> {
        match self {
            Self::Scalar(message) => Some(Arc::clone(message)),
            Self::Array(_) => None,
        }
    }
}

impl<M: Message> From<M> for Envelope {
    fn from(message: M) -> Self {
        Self::Scalar(Arc::new(message))
    }
}

impl From<MessageArray> for Envelope {
    fn from(array: MessageArray) -> Self {
        Self::Array(array)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope({})", self.message_type())
    }
}

// ---------------------------------------------------------------------------
// DeadMessage
// ---------------------------------------------------------------------------

/// Envelope delivered when a publication matched no handler.
///
/// Subscribe to `DeadMessage` itself to observe unmatched publications; the
/// wrapper is matched exactly; no subtype or variadic expansion applies to
/// it.
pub struct DeadMessage {
    published: Box<[Envelope]>,
}

impl DeadMessage {
    pub(crate) fn new(published: Vec<Envelope>) -> Self {
        Self {
            published: published.into(),
        }
    }

    /// The originally-published tuple, in posting order.
    #[must_use]
    pub fn published(&self) -> &[Envelope] {
        &self.published
    }
}

impl fmt::Debug for DeadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadMessage")
            .field("published", &self.published)
            .finish()
    }
}

impl_message!(
    /// Descriptor for [`DeadMessage`].
    pub static DEAD_MESSAGE: DeadMessage
);

// ===========================================================================
// Tests
// ===========================================================================
