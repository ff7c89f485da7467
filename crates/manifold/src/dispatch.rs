//! The dispatch core: from a posted tuple to handler invocations.
//!
//! Every publication expands into up to three disjoint buckets, processed
//! in order: exact declared-type matches, supertype matches, and variadic
//! matches (a synthesized one-element array per posted value, or the posted
//! array itself). The match set is captured atomically under the registry
//! read lock; handlers run outside it.
//!
//! When no bucket applicable to the configured [`DispatchMode`] matches,
//! the tuple is wrapped in a [`DeadMessage`] and delivered to subscriptions
//! declared exactly on `DeadMessage`. No subtype or variadic expansion
//! applies to the fallback itself.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::config::DispatchMode;
use crate::error::ErrorSinks;
use crate::hierarchy::MessageType;
use crate::message::{DeadMessage, Envelope, Message, MessageArray};
use crate::subscription::{MatchSet, SubscriptionRegistry};

pub(crate) struct Dispatch {
    registry: Arc<SubscriptionRegistry>,
    sinks: Arc<ErrorSinks>,
    mode: DispatchMode,
}

impl Dispatch {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        sinks: Arc<ErrorSinks>,
        mode: DispatchMode,
    ) -> Self {
        Self {
            registry,
            sinks,
            mode,
        }
    }

    pub(crate) fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Publishes a single value.
    pub(crate) fn publish(&self, message: Envelope) {
        let ty = message.message_type();
        let matches = self.registry.match_single(ty, self.mode);
        let args = [message];

        let mut delivered = self.deliver_exact_and_super(&matches, &args);
        delivered |= self.deliver_var_args(&matches, &args);

        if !delivered {
            self.dead_letter(&args);
        }
    }

    /// Publishes a two-value tuple.
    pub(crate) fn publish2(&self, m1: Envelope, m2: Envelope) {
        let mut args = SmallVec::new();
        args.push(m1);
        args.push(m2);
        self.publish_tuple(args, true);
    }

    /// Publishes a three-value tuple.
    pub(crate) fn publish3(&self, m1: Envelope, m2: Envelope, m3: Envelope) {
        let mut args = SmallVec::new();
        args.push(m1);
        args.push(m2);
        args.push(m3);
        self.publish_tuple(args, true);
    }

    /// Publishes an arbitrary tuple. Tuples of one to three values take the
    /// fixed-arity paths; past arity three only the exact tuple key and the
    /// same-type variadic match apply.
    pub(crate) fn publish_many(&self, messages: Vec<Envelope>) {
        let mut args: SmallVec<[Envelope; 4]> = SmallVec::from_vec(messages);
        match args.len() {
            0 => {}
            1 => {
                let message = args.remove(0);
                self.publish(message);
            }
            2 | 3 => self.publish_tuple(args, true),
            _ => self.publish_tuple(args, false),
        }
    }

    fn publish_tuple(&self, args: SmallVec<[Envelope; 4]>, with_supers: bool) {
        let tys: SmallVec<[MessageType; 4]> =
            args.iter().map(Envelope::message_type).collect();
        let matches = self.registry.match_tuple(&tys, self.mode, with_supers);

        let mut delivered = self.deliver_exact_and_super(&matches, &args);
        delivered |= self.deliver_var_args(&matches, &args);

        if !delivered {
            self.dead_letter(&args);
        }
    }

    /// Exact bucket first, then supertypes. Returns whether any
    /// subscription was delivered to.
    fn deliver_exact_and_super(&self, matches: &MatchSet, args: &[Envelope]) -> bool {
        let mut delivered = false;
        for sub in &matches.exact {
            sub.publish(args, &self.sinks);
            delivered = true;
        }
        for sub in matches.supers.iter() {
            sub.publish(args, &self.sinks);
            delivered = true;
        }
        delivered
    }

    /// Variadic bucket: synthesize one array holding every posted value
    /// (one slot per argument) and deliver it to the exact, then the
    /// supertype, varargs subscriptions.
    fn deliver_var_args(&self, matches: &MatchSet, args: &[Envelope]) -> bool {
        if !matches.has_var_args() {
            return false;
        }

        // The registry only fills these buckets for uniform scalar tuples,
        // so every envelope yields its element.
        let items: Vec<Arc<dyn Message>> =
            args.iter().filter_map(Envelope::to_scalar).collect();
        debug_assert_eq!(items.len(), args.len());

        let elem = args[0].type_info();
        let array = MessageArray::from_parts(elem, items);
        let va_args = [Envelope::Array(array)];

        let mut delivered = false;
        for sub in matches.var_arg_exact.iter() {
            sub.publish(&va_args, &self.sinks);
            delivered = true;
        }
        for sub in matches.var_arg_super.iter() {
            sub.publish(&va_args, &self.sinks);
            delivered = true;
        }
        delivered
    }

    /// Delivers the unmatched tuple to exact `DeadMessage` subscriptions.
    fn dead_letter(&self, published: &[Envelope]) {
        let subs = self
            .registry
            .subscriptions_exact(MessageType::of::<DeadMessage>());
        if subs.is_empty() {
            return;
        }
        let dead = DeadMessage::new(published.to_vec());
        let args = [Envelope::from(dead)];
        for sub in &subs {
            sub.publish(&args, &self.sinks);
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch").field("mode", &self.mode).finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, Listener};
    use crate::impl_message;
    use std::any::Any;
    use std::sync::Mutex;

    struct Number(f64);
    struct Integer(i64);
    struct Double(f64);
    struct Word(&'static str);
    struct Widget;

    impl_message!(static NUMBER: Number);
    impl_message!(static INTEGER: Integer, extends [NUMBER]);
    impl_message!(static DOUBLE: Double, extends [NUMBER]);
    impl_message!(static WORD: Word);
    impl_message!(static WIDGET: Widget);

    /// Records every delivery as a tagged string, in order.
    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
    }

    impl Log {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut self.events.lock().unwrap())
        }
    }

    fn fixture(mode: DispatchMode) -> (Dispatch, Arc<SubscriptionRegistry>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let sinks = Arc::new(ErrorSinks::new());
        let dispatch = Dispatch::new(Arc::clone(&registry), sinks, mode);
        (dispatch, registry)
    }

    // Listener with one subtype-accepting Number handler and one exact
    // Integer handler.
    struct TwoHandlerListener(Arc<Log>);

    impl Listener for TwoHandlerListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![
                Handler::one_with_subtypes(&NUMBER, |l: &TwoHandlerListener, m: &dyn Message| {
                    l.0.push(format!("h1:{}", m.type_info().name()));
                    Ok(())
                }),
                Handler::one(|l: &TwoHandlerListener, _: &Integer| {
                    l.0.push("h2:Integer");
                    Ok(())
                }),
            ]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[test]
    fn test_subtype_and_exact_buckets() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(TwoHandlerListener(log.clone())));

        dispatch.publish(Envelope::from(Integer(7)));
        // Exact before super.
        assert_eq!(log.take(), vec!["h2:Integer", "h1:Integer"]);

        dispatch.publish(Envelope::from(Double(3.14)));
        assert_eq!(log.take(), vec!["h1:Double"]);

        dispatch.publish(Envelope::from(Number(1.0)));
        assert_eq!(log.take(), vec!["h1:Number"]);
    }

    #[test]
    fn test_exact_mode_skips_supertypes() {
        let (dispatch, registry) = fixture(DispatchMode::Exact);
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(TwoHandlerListener(log.clone())));

        dispatch.publish(Envelope::from(Double(2.0)));
        // No exact Double handler and supers are disabled: nothing fires.
        assert_eq!(log.take(), Vec::<String>::new());

        dispatch.publish(Envelope::from(Integer(1)));
        assert_eq!(log.take(), vec!["h2:Integer"]);
    }

    // Variadic listener declared on Word[].
    struct VarArgWords(Arc<Log>);

    impl Listener for VarArgWords {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::var_args_with_subtypes::<VarArgWords, Word, _>(
                |l, array| {
                    let joined: Vec<&str> = array
                        .iter()
                        .map(|m| m.as_any().downcast_ref::<Word>().unwrap().0)
                        .collect();
                    l.0.push(format!("h:[{}]", joined.join(",")));
                    Ok(())
                },
            )]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[test]
    fn test_var_arg_wraps_single_value() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(VarArgWords(log.clone())));

        dispatch.publish(Envelope::from(Word("hi")));
        assert_eq!(log.take(), vec!["h:[hi]"]);
    }

    #[test]
    fn test_posted_array_is_not_rewrapped() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(VarArgWords(log.clone())));

        let array = MessageArray::new(vec![Word("a"), Word("b")]);
        dispatch.publish(Envelope::from(array));
        // Declared Word[], posted Word[]: exact bucket, array as-is.
        assert_eq!(log.take(), vec!["h:[a,b]"]);
    }

    #[test]
    fn test_var_arg_match_suppresses_dead_letter() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(VarArgWords(log.clone())));
        registry.subscribe(Arc::new(DeadLogger(log.clone())));

        dispatch.publish(Envelope::from(Word("hi")));
        assert_eq!(log.take(), vec!["h:[hi]"], "no dead letter fired");
    }

    // Dead letter listener.
    struct DeadLogger(Arc<Log>);

    impl Listener for DeadLogger {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::one(|l: &DeadLogger, dead: &DeadMessage| {
                l.0.push(format!("dead:{}", dead.published().len()));
                Ok(())
            })]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    struct WidgetListener(Arc<Log>);

    impl Listener for WidgetListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::one(|l: &WidgetListener, _: &Widget| {
                l.0.push("widget");
                Ok(())
            })]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[test]
    fn test_dead_letter_fires_until_a_handler_exists() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(DeadLogger(log.clone())));

        dispatch.publish(Envelope::from(Widget));
        assert_eq!(log.take(), vec!["dead:1"]);

        registry.subscribe(Arc::new(WidgetListener(log.clone())));
        dispatch.publish(Envelope::from(Widget));
        assert_eq!(log.take(), vec!["widget"], "dead handler suppressed");
    }

    #[test]
    fn test_dead_letter_carries_the_tuple() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(DeadLogger(log.clone())));

        dispatch.publish2(Envelope::from(Widget), Envelope::from(Word("x")));
        assert_eq!(log.take(), vec!["dead:2"]);
    }

    // Two-argument subtype-accepting handler.
    struct PairListener(Arc<Log>);

    impl Listener for PairListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::two_with_subtypes(
                [&NUMBER, &WORD],
                |l: &PairListener, a: &dyn Message, b: &dyn Message| {
                    l.0
                        .push(format!("pair:{}/{}", a.type_info().name(), b.type_info().name()));
                    Ok(())
                },
            )]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[test]
    fn test_two_arg_subtype_match() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(PairListener(log.clone())));

        dispatch.publish2(Envelope::from(Integer(1)), Envelope::from(Word("s")));
        assert_eq!(log.take(), vec!["pair:Integer/Word"]);

        dispatch.publish2(Envelope::from(Integer(1)), Envelope::from(Integer(2)));
        assert_eq!(log.take(), Vec::<String>::new(), "second arg incompatible");
    }

    #[test]
    fn test_multi_arg_same_type_var_args() {
        struct Ints(Arc<Log>);
        impl Listener for Ints {
            fn handlers(&self) -> Vec<Handler> {
                vec![Handler::var_args::<Ints, Integer, _>(|l, array| {
                    l.0.push(format!("ints:{}", array.len()));
                    Ok(())
                })]
            }
            fn as_any(&self) -> &(dyn Any + Send + Sync) {
                self
            }
        }

        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(Ints(log.clone())));

        // Three same-typed values collapse into one three-slot array.
        dispatch.publish3(
            Envelope::from(Integer(1)),
            Envelope::from(Integer(2)),
            Envelope::from(Integer(3)),
        );
        assert_eq!(log.take(), vec!["ints:3"]);

        // Mixed types post no variadic array.
        dispatch.publish2(Envelope::from(Integer(1)), Envelope::from(Word("x")));
        assert_eq!(log.take(), Vec::<String>::new());
    }

    #[test]
    fn test_variadic_arity_four_uses_tuple_key_only() {
        struct Quad(Arc<Log>);
        impl Listener for Quad {
            fn handlers(&self) -> Vec<Handler> {
                vec![Handler::many::<Quad, _>(
                    &[&WORD, &WORD, &WORD, &WORD],
                    |l, args| {
                        l.0.push(format!("quad:{}", args.len()));
                        Ok(())
                    },
                )]
            }
            fn as_any(&self) -> &(dyn Any + Send + Sync) {
                self
            }
        }

        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(Quad(log.clone())));

        let words: Vec<Envelope> = ["a", "b", "c", "d"]
            .iter()
            .map(|w| Envelope::from(Word(w)))
            .collect();
        dispatch.publish_many(words);
        assert_eq!(log.take(), vec!["quad:4"]);
    }

    #[test]
    fn test_publish_many_small_tuples_keep_super_matching() {
        let (dispatch, registry) = fixture(DispatchMode::default());
        let log = Arc::new(Log::default());
        registry.subscribe(Arc::new(PairListener(log.clone())));

        dispatch.publish_many(vec![
            Envelope::from(Integer(1)),
            Envelope::from(Word("s")),
        ]);
        assert_eq!(log.take(), vec!["pair:Integer/Word"]);
    }

    #[test]
    fn test_empty_publish_many_is_noop() {
        let (dispatch, _registry) = fixture(DispatchMode::default());
        dispatch.publish_many(Vec::new());
    }
}
