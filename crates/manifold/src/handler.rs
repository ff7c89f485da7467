//! Handler metadata: declared parameters, matching flags, erased invokers.
//!
//! A [`Handler`] is the immutable record the registry keeps per handler
//! method: arity, declared parameter types, whether it consents to subtype
//! and variadic matching, and a closure that applies the method to a
//! listener instance and an argument tuple.
//!
//! Exact handlers are built from typed closures (`one`, `two`, `three`,
//! `array`); subtype-accepting handlers receive erased payloads because a
//! posted subtype value cannot be viewed as its declared supertype in Rust.

use std::any::{type_name, Any};
use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::hierarchy::{MessageType, TypeInfo};
use crate::message::{Envelope, Message, MessageArray};

/// Failure value returned by a handler invocation.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// An object whose class declares handler methods.
///
/// `handlers` is the metadata provider: it is invoked once for the first
/// subscribed instance of a concrete class and the resulting table is cached
/// and shared by every later instance of that class. An empty table marks
/// the class as a non-listener.
pub trait Listener: Send + Sync + 'static {
    /// Describes the handler methods of this listener class.
    fn handlers(&self) -> Vec<Handler>;

    /// Upcast used to recover the concrete listener type inside invokers.
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

type InvokeFn = dyn Fn(&dyn Listener, &[Envelope]) -> HandlerResult + Send + Sync;

/// Invocation shape mismatches. These indicate wiring bugs (a handler
/// attached to the wrong listener class or called with the wrong tuple) and
/// surface through the error sink like any other handler failure.
#[derive(Debug, Error)]
enum InvokeError {
    #[error("listener instance is not a `{0}`")]
    ListenerType(&'static str),
    #[error("argument is not a `{0}`")]
    ArgumentType(&'static str),
    #[error("handler expected {expected} argument(s), got {got}")]
    Arity { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Immutable metadata for one handler method.
pub struct Handler {
    params: SmallVec<[MessageType; 3]>,
    accepts_subtypes: bool,
    accepts_varargs: bool,
    invoke: Box<InvokeFn>,
}

impl Handler {
    /// Declared parameter types, in order.
    #[must_use]
    pub fn params(&self) -> &[MessageType] {
        &self.params
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether publications of subtypes of the declared types may invoke
    /// this handler.
    #[must_use]
    pub fn accepts_subtypes(&self) -> bool {
        self.accepts_subtypes
    }

    /// Whether single values may be delivered as synthesized one-element
    /// arrays. Only meaningful for array-declared handlers.
    #[must_use]
    pub fn accepts_varargs(&self) -> bool {
        self.accepts_varargs
    }

    /// Applies the handler to a listener instance and an argument tuple.
    ///
    /// # Errors
    ///
    /// Returns the handler's own failure, or a shape-mismatch error when the
    /// listener or arguments do not match the declared signature.
    pub fn invoke(&self, listener: &dyn Listener, args: &[Envelope]) -> HandlerResult {
        (self.invoke)(listener, args)
    }

    // --- exact, typed ---

    /// Single-parameter handler matched exactly on `M`.
    pub fn one<L, M, F>(f: F) -> Self
    where
        L: Listener,
        M: Message,
        F: Fn(&L, &M) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            params: SmallVec::from_slice(&[MessageType::of::<M>()]),
            accepts_subtypes: false,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                let [arg] = args else {
                    return Err(arity_error(1, args.len()));
                };
                f(typed_listener::<L>(listener)?, typed_arg::<M>(arg)?)
            }),
        }
    }

    /// Two-parameter handler matched exactly on `(M1, M2)`.
    pub fn two<L, M1, M2, F>(f: F) -> Self
    where
        L: Listener,
        M1: Message,
        M2: Message,
        F: Fn(&L, &M1, &M2) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            params: SmallVec::from_slice(&[MessageType::of::<M1>(), MessageType::of::<M2>()]),
            accepts_subtypes: false,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                let [a, b] = args else {
                    return Err(arity_error(2, args.len()));
                };
                f(
                    typed_listener::<L>(listener)?,
                    typed_arg::<M1>(a)?,
                    typed_arg::<M2>(b)?,
                )
            }),
        }
    }

    /// Three-parameter handler matched exactly on `(M1, M2, M3)`.
    pub fn three<L, M1, M2, M3, F>(f: F) -> Self
    where
        L: Listener,
        M1: Message,
        M2: Message,
        M3: Message,
        F: Fn(&L, &M1, &M2, &M3) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            params: SmallVec::from_slice(&[
                MessageType::of::<M1>(),
                MessageType::of::<M2>(),
                MessageType::of::<M3>(),
            ]),
            accepts_subtypes: false,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                let [a, b, c] = args else {
                    return Err(arity_error(3, args.len()));
                };
                f(
                    typed_listener::<L>(listener)?,
                    typed_arg::<M1>(a)?,
                    typed_arg::<M2>(b)?,
                    typed_arg::<M3>(c)?,
                )
            }),
        }
    }

    // --- subtype-accepting, erased ---

    /// Single-parameter handler declared on `declared`, also invoked for
    /// subtypes. The payload arrives erased.
    pub fn one_with_subtypes<L, F>(declared: &'static TypeInfo, f: F) -> Self
    where
        L: Listener,
        F: Fn(&L, &dyn Message) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            params: SmallVec::from_slice(&[MessageType::Scalar(declared)]),
            accepts_subtypes: true,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                let [arg] = args else {
                    return Err(arity_error(1, args.len()));
                };
                f(typed_listener::<L>(listener)?, scalar_arg(arg)?)
            }),
        }
    }

    /// Two-parameter subtype-accepting handler.
    pub fn two_with_subtypes<L, F>(declared: [&'static TypeInfo; 2], f: F) -> Self
    where
        L: Listener,
        F: Fn(&L, &dyn Message, &dyn Message) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            params: SmallVec::from_slice(&[
                MessageType::Scalar(declared[0]),
                MessageType::Scalar(declared[1]),
            ]),
            accepts_subtypes: true,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                let [a, b] = args else {
                    return Err(arity_error(2, args.len()));
                };
                f(typed_listener::<L>(listener)?, scalar_arg(a)?, scalar_arg(b)?)
            }),
        }
    }

    /// Three-parameter subtype-accepting handler.
    pub fn three_with_subtypes<L, F>(declared: [&'static TypeInfo; 3], f: F) -> Self
    where
        L: Listener,
        F: Fn(&L, &dyn Message, &dyn Message, &dyn Message) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        Self {
            params: declared.iter().copied().map(MessageType::Scalar).collect(),
            accepts_subtypes: true,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                let [a, b, c] = args else {
                    return Err(arity_error(3, args.len()));
                };
                f(
                    typed_listener::<L>(listener)?,
                    scalar_arg(a)?,
                    scalar_arg(b)?,
                    scalar_arg(c)?,
                )
            }),
        }
    }

    /// Handler of arity four or more, matched exactly on the declared tuple.
    /// Supertype matching is not offered past arity three.
    ///
    /// # Panics
    ///
    /// Panics when fewer than two parameter types are declared; use the
    /// fixed-arity constructors for small tuples.
    pub fn many<L, F>(declared: &[&'static TypeInfo], f: F) -> Self
    where
        L: Listener,
        F: Fn(&L, &[Envelope]) -> HandlerResult + Send + Sync + 'static,
    {
        assert!(
            declared.len() >= 2,
            "many() requires at least two parameters"
        );
        let params: SmallVec<[MessageType; 3]> =
            declared.iter().copied().map(MessageType::Scalar).collect();
        let expected = params.len();
        Self {
            params,
            accepts_subtypes: false,
            accepts_varargs: false,
            invoke: Box::new(move |listener, args| {
                if args.len() != expected {
                    return Err(arity_error(expected, args.len()));
                }
                f(typed_listener::<L>(listener)?, args)
            }),
        }
    }

    // --- array-declared ---

    /// Handler declared on `M[]`, matched only against posted arrays.
    pub fn array<L, M, F>(f: F) -> Self
    where
        L: Listener,
        M: Message,
        F: Fn(&L, &MessageArray) -> HandlerResult + Send + Sync + 'static,
    {
        Self::array_handler::<L, F>(MessageType::array::<M>(), false, false, f)
    }

    /// Handler declared on `M[]` that also accepts posted arrays of
    /// subtypes of `M`.
    pub fn array_with_subtypes<L, M, F>(f: F) -> Self
    where
        L: Listener,
        M: Message,
        F: Fn(&L, &MessageArray) -> HandlerResult + Send + Sync + 'static,
    {
        Self::array_handler::<L, F>(MessageType::array::<M>(), true, false, f)
    }

    /// Variadic handler declared on `M[]`: single `M` values arrive as
    /// synthesized one-element arrays, posted `M[]` values arrive as-is.
    pub fn var_args<L, M, F>(f: F) -> Self
    where
        L: Listener,
        M: Message,
        F: Fn(&L, &MessageArray) -> HandlerResult + Send + Sync + 'static,
    {
        Self::array_handler::<L, F>(MessageType::array::<M>(), false, true, f)
    }

    /// Variadic handler declared on `M[]` that also accepts values whose
    /// type is a subtype of `M`.
    pub fn var_args_with_subtypes<L, M, F>(f: F) -> Self
    where
        L: Listener,
        M: Message,
        F: Fn(&L, &MessageArray) -> HandlerResult + Send + Sync + 'static,
    {
        Self::array_handler::<L, F>(MessageType::array::<M>(), true, true, f)
    }

    fn array_handler<L, F>(
        declared: MessageType,
        accepts_subtypes: bool,
        accepts_varargs: bool,
        f: F,
    ) -> Self
    where
        L: Listener,
        F: Fn(&L, &MessageArray) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            params: SmallVec::from_slice(&[declared]),
            accepts_subtypes,
            accepts_varargs,
            invoke: Box::new(move |listener, args| {
                let [arg] = args else {
                    return Err(arity_error(1, args.len()));
                };
                f(typed_listener::<L>(listener)?, array_arg(arg)?)
            }),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("params", &self.params)
            .field("accepts_subtypes", &self.accepts_subtypes)
            .field("accepts_varargs", &self.accepts_varargs)
            .finish_non_exhaustive()
    }
}

fn arity_error(expected: usize, got: usize) -> HandlerError {
    Box::new(InvokeError::Arity { expected, got })
}

fn typed_listener<L: Listener>(listener: &dyn Listener) -> Result<&L, HandlerError> {
    listener
        .as_any()
        .downcast_ref::<L>()
        .ok_or_else(|| Box::new(InvokeError::ListenerType(type_name::<L>())) as HandlerError)
}

fn typed_arg<M: Message>(env: &Envelope) -> Result<&M, HandlerError> {
    env.downcast_ref::<M>()
        .ok_or_else(|| Box::new(InvokeError::ArgumentType(type_name::<M>())) as HandlerError)
}

fn scalar_arg(env: &Envelope) -> Result<&dyn Message, HandlerError> {
    env.as_message()
        .ok_or_else(|| Box::new(InvokeError::ArgumentType("scalar message")) as HandlerError)
}

fn array_arg(env: &Envelope) -> Result<&MessageArray, HandlerError> {
    env.as_array()
        .ok_or_else(|| Box::new(InvokeError::ArgumentType("message array")) as HandlerError)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_message;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Animal(&'static str);
    struct Dog(&'static str);

    impl_message!(static ANIMAL: Animal);
    impl_message!(static DOG: Dog, extends [ANIMAL]);

    #[derive(Default)]
    struct Recorder {
        hits: AtomicUsize,
        names: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, name: impl Into<String>) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.names.lock().unwrap().push(name.into());
        }
    }

    impl Listener for Recorder {
        fn handlers(&self) -> Vec<Handler> {
            Vec::new()
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    struct OtherListener;

    impl Listener for OtherListener {
        fn handlers(&self) -> Vec<Handler> {
            Vec::new()
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    // --- Typed constructors ---

    #[test]
    fn test_one_invokes_typed_closure() {
        let handler = Handler::one(|l: &Recorder, dog: &Dog| {
            l.record(dog.0);
            Ok(())
        });

        assert_eq!(handler.arity(), 1);
        assert_eq!(handler.params(), &[MessageType::of::<Dog>()]);
        assert!(!handler.accepts_subtypes());
        assert!(!handler.accepts_varargs());

        let listener = Recorder::default();
        handler
            .invoke(&listener, &[Envelope::from(Dog("rex"))])
            .unwrap();
        assert_eq!(listener.hits.load(Ordering::SeqCst), 1);
        assert_eq!(*listener.names.lock().unwrap(), vec!["rex"]);
    }

    #[test]
    fn test_two_and_three() {
        let two = Handler::two(|l: &Recorder, a: &Dog, b: &Animal| {
            l.record(format!("{}+{}", a.0, b.0));
            Ok(())
        });
        assert_eq!(
            two.params(),
            &[MessageType::of::<Dog>(), MessageType::of::<Animal>()]
        );

        let listener = Recorder::default();
        two.invoke(
            &listener,
            &[Envelope::from(Dog("rex")), Envelope::from(Animal("cat"))],
        )
        .unwrap();
        assert_eq!(*listener.names.lock().unwrap(), vec!["rex+cat"]);

        let three = Handler::three(|l: &Recorder, a: &Dog, _: &Dog, _: &Dog| {
            l.record(a.0);
            Ok(())
        });
        assert_eq!(three.arity(), 3);
    }

    // --- Shape mismatches ---

    #[test]
    fn test_wrong_listener_type_is_an_error() {
        let handler = Handler::one(|_: &Recorder, _: &Dog| Ok(()));
        let err = handler
            .invoke(&OtherListener, &[Envelope::from(Dog("rex"))])
            .unwrap_err();
        assert!(err.to_string().contains("listener instance"));
    }

    #[test]
    fn test_wrong_arity_is_an_error() {
        let handler = Handler::one(|_: &Recorder, _: &Dog| Ok(()));
        let err = handler.invoke(&Recorder::default(), &[]).unwrap_err();
        assert!(err.to_string().contains("expected 1"));
    }

    #[test]
    fn test_wrong_argument_type_is_an_error() {
        let handler = Handler::one(|_: &Recorder, _: &Dog| Ok(()));
        let err = handler
            .invoke(&Recorder::default(), &[Envelope::from(Animal("cat"))])
            .unwrap_err();
        assert!(err.to_string().contains("argument is not"));
    }

    // --- Subtype-accepting ---

    #[test]
    fn test_one_with_subtypes_receives_erased_payload() {
        let handler = Handler::one_with_subtypes(&ANIMAL, |l: &Recorder, m: &dyn Message| {
            l.record(m.type_info().name());
            Ok(())
        });

        assert!(handler.accepts_subtypes());
        assert_eq!(handler.params(), &[MessageType::Scalar(&ANIMAL)]);

        let listener = Recorder::default();
        handler
            .invoke(&listener, &[Envelope::from(Dog("rex"))])
            .unwrap();
        assert_eq!(*listener.names.lock().unwrap(), vec!["Dog"]);
    }

    // --- Array-declared ---

    #[test]
    fn test_var_args_receives_array() {
        let handler = Handler::var_args::<Recorder, Dog, _>(|l, array| {
            l.record(format!("n={}", array.len()));
            Ok(())
        });

        assert!(handler.accepts_varargs());
        assert!(!handler.accepts_subtypes());
        assert_eq!(handler.params(), &[MessageType::array::<Dog>()]);

        let listener = Recorder::default();
        let array = MessageArray::new(vec![Dog("a"), Dog("b")]);
        handler
            .invoke(&listener, &[Envelope::from(array)])
            .unwrap();
        assert_eq!(*listener.names.lock().unwrap(), vec!["n=2"]);
    }

    #[test]
    fn test_array_handler_flags() {
        let plain = Handler::array::<Recorder, Animal, _>(|_, _| Ok(()));
        assert!(!plain.accepts_subtypes());
        assert!(!plain.accepts_varargs());

        let sub = Handler::array_with_subtypes::<Recorder, Animal, _>(|_, _| Ok(()));
        assert!(sub.accepts_subtypes());
        assert!(!sub.accepts_varargs());

        let both = Handler::var_args_with_subtypes::<Recorder, Animal, _>(|_, _| Ok(()));
        assert!(both.accepts_subtypes());
        assert!(both.accepts_varargs());
        assert_eq!(both.params(), &[MessageType::array::<Animal>()]);
    }

    #[test]
    fn test_many_checks_arity() {
        let handler = Handler::many::<Recorder, _>(
            &[&DOG, &DOG, &DOG, &DOG],
            |l, args| {
                l.record(format!("k={}", args.len()));
                Ok(())
            },
        );
        assert_eq!(handler.arity(), 4);

        let listener = Recorder::default();
        let args: Vec<Envelope> = (0..4).map(|_| Envelope::from(Dog("x"))).collect();
        handler.invoke(&listener, &args).unwrap();
        assert_eq!(*listener.names.lock().unwrap(), vec!["k=4"]);

        let err = handler
            .invoke(&listener, &args[..2])
            .unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn test_handler_failure_propagates_to_caller() {
        let handler = Handler::one(|_: &Recorder, _: &Dog| Err("boom".into()));
        let err = handler
            .invoke(&Recorder::default(), &[Envelope::from(Dog("rex"))])
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
