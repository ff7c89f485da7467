//! The authoritative subscription index.
//!
//! Three tables answer every dispatch question: by listener class (fast
//! subscribe/unsubscribe), by single message type (exact match), and by
//! message-type tuple for arity ≥ 2 (a trie keyed by the declared parameter
//! sequence). A flat list of multi-argument subscriptions backs the tuple
//! supertype scans.
//!
//! # Locking
//!
//! One reader-writer lock guards the tables. Dispatch queries take the read
//! side and capture everything they need in a single acquisition; subscribe
//! and unsubscribe serialize on the write side. Supertype and variadic
//! lookups are memoized in side caches filled by readers and cleared on
//! every write, so no stale subscription ever survives a mutation. Handler
//! invocation always happens outside the lock, against snapshots.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::config::DispatchMode;
use crate::handler::Listener;
use crate::hierarchy::{MessageType, TypeHierarchy};

use super::cache::{empty_list, SubscriptionList, SuperCache, VarArgCache};
use super::subscription::Subscription;
use super::trie::TypeTrie;

/// Exact-match result vector; small enough to stay on the stack for the
/// common case.
pub type MatchVec = SmallVec<[Arc<Subscription>; 4]>;

/// Everything dispatch needs for one publication, captured atomically under
/// a single read-lock acquisition.
pub(crate) struct MatchSet {
    pub(crate) exact: MatchVec,
    pub(crate) supers: SubscriptionList,
    pub(crate) var_arg_exact: SubscriptionList,
    pub(crate) var_arg_super: SubscriptionList,
}

impl MatchSet {
    pub(crate) fn has_var_args(&self) -> bool {
        !self.var_arg_exact.is_empty() || !self.var_arg_super.is_empty()
    }
}

#[derive(Default)]
struct Tables {
    /// Listener class → its subscriptions, created once and stable.
    by_listener: FxHashMap<TypeId, Arc<[Arc<Subscription>]>>,
    /// Declared single type → subscriptions, in insertion order.
    by_single: FxHashMap<MessageType, Vec<Arc<Subscription>>>,
    /// Declared tuple (arity ≥ 2) → subscriptions.
    by_tuple: TypeTrie<Vec<Arc<Subscription>>>,
    /// Flat view of every arity ≥ 2 subscription, in insertion order;
    /// scan source for tuple supertype fills.
    multi: Vec<Arc<Subscription>>,
    /// Classes known to declare no handlers.
    non_listeners: FxHashSet<TypeId>,
}

// ---------------------------------------------------------------------------
// SubscriptionRegistry
// ---------------------------------------------------------------------------

/// Thread-safe subscription index with memoized dispatch lookups.
pub struct SubscriptionRegistry {
    tables: RwLock<Tables>,
    super_cache: SuperCache,
    var_arg_cache: VarArgCache,
    hierarchy: TypeHierarchy,
    /// Monotone: flips to true when the first varargs-accepting handler is
    /// registered and never returns to false. Lets publishes skip the
    /// variadic lookups entirely while no such handler exists.
    var_arg_possible: AtomicBool,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            super_cache: SuperCache::new(),
            var_arg_cache: VarArgCache::new(),
            hierarchy: TypeHierarchy::new(),
            var_arg_possible: AtomicBool::new(false),
        }
    }

    /// The supertype oracle this registry consults.
    #[must_use]
    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    /// Whether any varargs-accepting handler has ever been registered.
    #[must_use]
    pub fn var_arg_possible(&self) -> bool {
        self.var_arg_possible.load(Ordering::Acquire)
    }

    // --- subscribe / unsubscribe ---

    /// Binds a listener instance to every handler its class declares.
    ///
    /// The first instance of a class pays for metadata extraction and table
    /// insertion; later instances only join the existing listener sets.
    /// Classes without handlers are remembered and rejected cheaply.
    pub fn subscribe(&self, listener: Arc<dyn Listener>) {
        let class = listener_class(&listener);

        {
            let tables = self.tables.read();
            if tables.non_listeners.contains(&class) {
                return;
            }
            if let Some(existing) = tables.by_listener.get(&class).cloned() {
                drop(tables);
                for sub in existing.iter() {
                    sub.subscribe(Arc::clone(&listener));
                }
                self.super_cache.clear();
                self.var_arg_cache.clear();
                return;
            }
        }

        // Unknown class: extract metadata and build the subscriptions
        // outside the write lock, since they are not reachable yet.
        let handlers = listener.handlers();
        if handlers.is_empty() {
            let mut tables = self.tables.write();
            tables.non_listeners.insert(class);
            return;
        }

        let handler_count = handlers.len();
        let subs: Vec<Arc<Subscription>> = handlers
            .into_iter()
            .map(|handler| {
                let sub = Arc::new(Subscription::new(handler));
                sub.subscribe(Arc::clone(&listener));
                sub
            })
            .collect();

        let mut tables = self.tables.write();
        if let Some(existing) = tables.by_listener.get(&class).cloned() {
            // Lost the insert race: another thread registered the class
            // while we were building. Discard our set and join theirs.
            drop(tables);
            for sub in existing.iter() {
                sub.subscribe(Arc::clone(&listener));
            }
            self.super_cache.clear();
            self.var_arg_cache.clear();
            return;
        }

        let mut any_var_args = false;
        for sub in &subs {
            let handler = sub.handler();
            any_var_args |= handler.accepts_varargs();
            match handler.params() {
                [single] => {
                    tables
                        .by_single
                        .entry(*single)
                        .or_default()
                        .push(Arc::clone(sub));
                }
                params => {
                    tables
                        .by_tuple
                        .get_or_insert_with(params, Vec::new)
                        .push(Arc::clone(sub));
                    tables.multi.push(Arc::clone(sub));
                }
            }
        }
        tables.by_listener.insert(class, subs.into());
        if any_var_args {
            self.var_arg_possible.store(true, Ordering::Release);
        }
        self.super_cache.clear();
        self.var_arg_cache.clear();
        drop(tables);

        tracing::debug!(handlers = handler_count, "registered new listener class");
    }

    /// Removes a listener instance from every subscription of its class.
    /// Unknown classes and never-subscribed instances are no-ops.
    pub fn unsubscribe(&self, listener: &Arc<dyn Listener>) {
        let class = listener_class(listener);

        let subs = {
            let tables = self.tables.read();
            if tables.non_listeners.contains(&class) {
                return;
            }
            match tables.by_listener.get(&class) {
                Some(subs) => Arc::clone(subs),
                None => return,
            }
        };

        for sub in subs.iter() {
            sub.unsubscribe(listener);
        }

        // No table mutation, but cached lookups may hold listener-set state
        // decisions; drop them so the next query recomputes.
        self.super_cache.clear();
        self.var_arg_cache.clear();
    }

    /// Drops every table and cache. Used at bus shutdown to release
    /// listeners.
    pub(crate) fn clear(&self) {
        let mut tables = self.tables.write();
        tables.by_listener.clear();
        tables.by_single.clear();
        tables.by_tuple.clear();
        tables.multi.clear();
        tables.non_listeners.clear();
        self.super_cache.clear();
        self.var_arg_cache.clear();
    }

    // --- exact lookups ---

    /// Subscriptions declared exactly on `ty`, in insertion order.
    #[must_use]
    pub fn subscriptions_exact(&self, ty: MessageType) -> MatchVec {
        let tables = self.tables.read();
        exact_single(&tables, ty)
    }

    /// Subscriptions declared exactly on the tuple `tys`, in insertion
    /// order.
    #[must_use]
    pub fn subscriptions_exact_tuple(&self, tys: &[MessageType]) -> MatchVec {
        let tables = self.tables.read();
        exact_tuple(&tables, tys)
    }

    // --- supertype lookups ---

    /// Subscriptions declared on a strict supertype of `ty` that accept
    /// subtypes, in the oracle's supertype-traversal order. Never missing:
    /// returns an empty list when nothing matches.
    #[must_use]
    pub fn subscriptions_super(&self, ty: MessageType) -> SubscriptionList {
        let tables = self.tables.read();
        self.super_single_locked(&tables, ty)
    }

    /// Tuple variant of [`subscriptions_super`](Self::subscriptions_super):
    /// candidates must have the same arity, accept subtypes, and declare a
    /// (per-position) supertype of every posted type, with at least one
    /// position strictly above the posted type.
    #[must_use]
    pub fn subscriptions_super_tuple(&self, tys: &[MessageType]) -> SubscriptionList {
        let tables = self.tables.read();
        self.super_tuple_locked(&tables, tys)
    }

    // --- variadic lookups ---

    /// Subscriptions declared `T[]` with varargs acceptance, for element
    /// type `ty`.
    #[must_use]
    pub fn var_arg_exact(&self, ty: MessageType) -> SubscriptionList {
        let tables = self.tables.read();
        self.var_arg_exact_locked(&tables, ty)
    }

    /// Subscriptions declared `S[]` for a proper supertype `S` of `ty`,
    /// accepting both subtypes and varargs.
    #[must_use]
    pub fn var_arg_super(&self, ty: MessageType) -> SubscriptionList {
        let tables = self.tables.read();
        self.var_arg_super_locked(&tables, ty)
    }

    /// Tuple variant: the pairwise common subscriptions of
    /// [`var_arg_super`](Self::var_arg_super) across every posted type,
    /// preserving the order of the first operand.
    #[must_use]
    pub fn var_arg_super_tuple(&self, tys: &[MessageType]) -> SubscriptionList {
        let tables = self.tables.read();
        self.var_arg_super_tuple_locked(&tables, tys)
    }

    // --- dispatch snapshots ---

    /// Captures the full match set for a single posted value under one
    /// read-lock acquisition. Variadic buckets are only computed in the
    /// full dispatch mode, when some varargs handler exists, and when the
    /// posted value is not itself an array.
    pub(crate) fn match_single(&self, ty: MessageType, mode: DispatchMode) -> MatchSet {
        let tables = self.tables.read();
        let exact = exact_single(&tables, ty);
        let supers = if mode.includes_supers() {
            self.super_single_locked(&tables, ty)
        } else {
            empty_list()
        };
        let (var_arg_exact, var_arg_super) =
            if mode.includes_var_args() && self.var_arg_possible() && !ty.is_array() {
                (
                    self.var_arg_exact_locked(&tables, ty),
                    self.var_arg_super_locked(&tables, ty),
                )
            } else {
                (empty_list(), empty_list())
            };
        MatchSet {
            exact,
            supers,
            var_arg_exact,
            var_arg_super,
        }
    }

    /// Captures the match set for a posted tuple. Supertype matching is
    /// limited to arities two and three (`with_supers`); the variadic
    /// buckets apply only when every posted value shares one scalar runtime
    /// type.
    pub(crate) fn match_tuple(
        &self,
        tys: &[MessageType],
        mode: DispatchMode,
        with_supers: bool,
    ) -> MatchSet {
        let tables = self.tables.read();
        let exact = exact_tuple(&tables, tys);
        let supers = if with_supers && mode.includes_supers() {
            self.super_tuple_locked(&tables, tys)
        } else {
            empty_list()
        };

        let uniform = !tys.is_empty() && tys.iter().all(|ty| *ty == tys[0]);
        let (var_arg_exact, var_arg_super) = if mode.includes_var_args()
            && self.var_arg_possible()
            && uniform
            && !tys[0].is_array()
        {
            (
                self.var_arg_exact_locked(&tables, tys[0]),
                self.var_arg_super_tuple_locked(&tables, tys),
            )
        } else {
            (empty_list(), empty_list())
        };
        MatchSet {
            exact,
            supers,
            var_arg_exact,
            var_arg_super,
        }
    }

    // --- cache fills (called with the read lock held) ---

    fn super_single_locked(&self, tables: &Tables, ty: MessageType) -> SubscriptionList {
        if let Some(hit) = self.super_cache.single(ty) {
            return hit;
        }
        let mut out: Vec<Arc<Subscription>> = Vec::new();
        for super_ty in self.hierarchy.supertypes(ty).iter() {
            if let Some(subs) = tables.by_single.get(super_ty) {
                out.extend(
                    subs.iter()
                        .filter(|sub| sub.handler().accepts_subtypes())
                        .cloned(),
                );
            }
        }
        let list: SubscriptionList = out.into();
        self.super_cache.store_single(ty, Arc::clone(&list));
        list
    }

    fn super_tuple_locked(&self, tables: &Tables, tys: &[MessageType]) -> SubscriptionList {
        if let Some(hit) = self.super_cache.tuple(tys) {
            return hit;
        }

        let lists: Vec<Vec<Arc<Subscription>>> = (0..tys.len())
            .map(|position| self.position_super_list(tables, tys, position))
            .collect();

        let mut out: Vec<Arc<Subscription>> = Vec::new();
        if let Some((first, rest)) = lists.split_first() {
            'candidate: for sub in first {
                for list in rest {
                    if !list.iter().any(|other| Arc::ptr_eq(other, sub)) {
                        continue 'candidate;
                    }
                }
                // A handler declaring the posted tuple verbatim belongs to
                // the exact bucket, not here.
                if sub.handler().params() == tys {
                    continue;
                }
                out.push(Arc::clone(sub));
            }
        }

        let list: SubscriptionList = out.into();
        self.super_cache.store_tuple(tys, Arc::clone(&list));
        list
    }

    /// Multi-argument subscriptions whose parameter at `position` is the
    /// posted type or one of its supertypes, ordered by supertype-traversal
    /// rank and then insertion order.
    fn position_super_list(
        &self,
        tables: &Tables,
        tys: &[MessageType],
        position: usize,
    ) -> Vec<Arc<Subscription>> {
        let arity = tys.len();
        let posted = tys[position];

        let mut accepted: SmallVec<[MessageType; 8]> = SmallVec::new();
        accepted.push(posted);
        accepted.extend(self.hierarchy.supertypes(posted).iter().copied());

        let mut out = Vec::new();
        for declared in &accepted {
            for sub in &tables.multi {
                let handler = sub.handler();
                if handler.arity() == arity
                    && handler.accepts_subtypes()
                    && handler.params()[position] == *declared
                {
                    out.push(Arc::clone(sub));
                }
            }
        }
        out
    }

    fn var_arg_exact_locked(&self, tables: &Tables, ty: MessageType) -> SubscriptionList {
        if let Some(hit) = self.var_arg_cache.exact(ty) {
            return hit;
        }
        let mut out: Vec<Arc<Subscription>> = Vec::new();
        if let Some(array_ty) = ty.array_of() {
            if let Some(subs) = tables.by_single.get(&array_ty) {
                out.extend(
                    subs.iter()
                        .filter(|sub| sub.handler().accepts_varargs())
                        .cloned(),
                );
            }
        }
        let list: SubscriptionList = out.into();
        self.var_arg_cache.store_exact(ty, Arc::clone(&list));
        list
    }

    fn var_arg_super_locked(&self, tables: &Tables, ty: MessageType) -> SubscriptionList {
        if let Some(hit) = self.var_arg_cache.supers(ty) {
            return hit;
        }
        let mut out: Vec<Arc<Subscription>> = Vec::new();
        if let Some(array_ty) = ty.array_of() {
            for super_ty in self.hierarchy.supertypes(array_ty).iter() {
                if let Some(subs) = tables.by_single.get(super_ty) {
                    out.extend(
                        subs.iter()
                            .filter(|sub| {
                                let handler = sub.handler();
                                handler.accepts_subtypes() && handler.accepts_varargs()
                            })
                            .cloned(),
                    );
                }
            }
        }
        let list: SubscriptionList = out.into();
        self.var_arg_cache.store_supers(ty, Arc::clone(&list));
        list
    }

    fn var_arg_super_tuple_locked(
        &self,
        tables: &Tables,
        tys: &[MessageType],
    ) -> SubscriptionList {
        if let Some(hit) = self.var_arg_cache.super_tuple(tys) {
            return hit;
        }

        let lists: Vec<SubscriptionList> = tys
            .iter()
            .map(|ty| self.var_arg_super_locked(tables, *ty))
            .collect();

        let mut out: Vec<Arc<Subscription>> = Vec::new();
        if let Some((first, rest)) = lists.split_first() {
            'candidate: for sub in first.iter() {
                for list in rest {
                    if !list.iter().any(|other| Arc::ptr_eq(other, sub)) {
                        continue 'candidate;
                    }
                }
                out.push(Arc::clone(sub));
            }
        }

        let list: SubscriptionList = out.into();
        self.var_arg_cache.store_super_tuple(tys, Arc::clone(&list));
        list
    }

    #[cfg(test)]
    pub(crate) fn caches_empty(&self) -> bool {
        self.super_cache.is_empty() && self.var_arg_cache.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("SubscriptionRegistry")
            .field("listener_classes", &tables.by_listener.len())
            .field("single_types", &tables.by_single.len())
            .field("multi_subscriptions", &tables.multi.len())
            .field("var_arg_possible", &self.var_arg_possible())
            .finish()
    }
}

fn listener_class(listener: &Arc<dyn Listener>) -> TypeId {
    listener.as_any().type_id()
}

fn exact_single(tables: &Tables, ty: MessageType) -> MatchVec {
    tables
        .by_single
        .get(&ty)
        .map(|subs| subs.iter().cloned().collect())
        .unwrap_or_default()
}

fn exact_tuple(tables: &Tables, tys: &[MessageType]) -> MatchVec {
    tables
        .by_tuple
        .get(tys)
        .map(|subs| subs.iter().cloned().collect())
        .unwrap_or_default()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::impl_message;
    use crate::message::{Message, MessageArray};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::thread;

    struct Number(f64);
    struct Integer(i64);
    struct Word(&'static str);

    impl_message!(static NUMBER: Number);
    impl_message!(static INTEGER: Integer, extends [NUMBER]);
    impl_message!(static WORD: Word);

    #[derive(Default)]
    struct IntListener {
        hits: AtomicUsize,
    }

    impl Listener for IntListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::one(|l: &IntListener, _: &Integer| {
                l.hits.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[derive(Default)]
    struct NumberListener;

    impl Listener for NumberListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::one_with_subtypes(
                &NUMBER,
                |_: &NumberListener, _: &dyn Message| Ok(()),
            )]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    struct Silent;

    impl Listener for Silent {
        fn handlers(&self) -> Vec<Handler> {
            Vec::new()
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[derive(Default)]
    struct PairListener;

    impl Listener for PairListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::two_with_subtypes(
                [&NUMBER, &WORD],
                |_: &PairListener, _: &dyn Message, _: &dyn Message| Ok(()),
            )]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[derive(Default)]
    struct VarArgListener;

    impl Listener for VarArgListener {
        fn handlers(&self) -> Vec<Handler> {
            vec![Handler::var_args_with_subtypes::<VarArgListener, Number, _>(
                |_, _: &MessageArray| Ok(()),
            )]
        }

        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    // --- Subscribe / unsubscribe ---

    #[test]
    fn test_first_subscribe_creates_tables() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(IntListener::default()));

        let exact = registry.subscriptions_exact(MessageType::of::<Integer>());
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].listener_count(), 1);
    }

    #[test]
    fn test_second_instance_reuses_subscriptions() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(IntListener::default()));
        registry.subscribe(Arc::new(IntListener::default()));

        let exact = registry.subscriptions_exact(MessageType::of::<Integer>());
        assert_eq!(exact.len(), 1, "one subscription per handler method");
        assert_eq!(exact[0].listener_count(), 2);
    }

    #[test]
    fn test_non_listener_class_is_remembered() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(Silent));
        registry.subscribe(Arc::new(Silent));
        // Nothing indexed anywhere.
        assert!(registry
            .subscriptions_exact(MessageType::of::<Integer>())
            .is_empty());
    }

    #[test]
    fn test_unsubscribe_removes_instance_only() {
        let registry = SubscriptionRegistry::new();
        let a = Arc::new(IntListener::default());
        let b = Arc::new(IntListener::default());
        registry.subscribe(a.clone());
        registry.subscribe(b.clone());

        let erased: Arc<dyn Listener> = a;
        registry.unsubscribe(&erased);

        let exact = registry.subscriptions_exact(MessageType::of::<Integer>());
        assert_eq!(exact[0].listener_count(), 1);

        // Unsubscribing again is a no-op (idempotent).
        registry.unsubscribe(&erased);
        assert_eq!(exact[0].listener_count(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_class_is_noop() {
        let registry = SubscriptionRegistry::new();
        let listener: Arc<dyn Listener> = Arc::new(IntListener::default());
        registry.unsubscribe(&listener);
    }

    // --- Supertype queries ---

    #[test]
    fn test_super_lookup_filters_on_subtype_acceptance() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(IntListener::default()));
        registry.subscribe(Arc::new(NumberListener));

        // Integer posted: the Number handler accepts subtypes and matches.
        let supers = registry.subscriptions_super(MessageType::of::<Integer>());
        assert_eq!(supers.len(), 1);
        assert_eq!(
            supers[0].handler().params(),
            &[MessageType::of::<Number>()]
        );

        // Number posted: nothing above it is subscribed.
        let supers = registry.subscriptions_super(MessageType::of::<Number>());
        assert!(supers.is_empty());
    }

    #[test]
    fn test_exact_handler_never_leaks_into_super_bucket() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(IntListener::default()));

        // IntListener's handler is exact on Integer; posting Integer finds
        // it in the exact bucket only.
        let supers = registry.subscriptions_super(MessageType::of::<Integer>());
        assert!(supers.is_empty());
    }

    #[test]
    fn test_super_tuple_intersection() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(PairListener));

        let posted = [MessageType::of::<Integer>(), MessageType::of::<Word>()];
        let supers = registry.subscriptions_super_tuple(&posted);
        assert_eq!(supers.len(), 1);

        // Incompatible second position: no match.
        let posted = [MessageType::of::<Integer>(), MessageType::of::<Integer>()];
        let supers = registry.subscriptions_super_tuple(&posted);
        assert!(supers.is_empty());

        // The declared tuple itself is an exact match, not a super match.
        let posted = [MessageType::of::<Number>(), MessageType::of::<Word>()];
        let supers = registry.subscriptions_super_tuple(&posted);
        assert!(supers.is_empty());
        let exact = registry.subscriptions_exact_tuple(&posted);
        assert_eq!(exact.len(), 1);
    }

    // --- Variadic queries ---

    #[test]
    fn test_var_arg_possibility_is_monotone() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.var_arg_possible());

        registry.subscribe(Arc::new(IntListener::default()));
        assert!(!registry.var_arg_possible());

        let listener = Arc::new(VarArgListener);
        registry.subscribe(listener.clone());
        assert!(registry.var_arg_possible());

        let erased: Arc<dyn Listener> = listener;
        registry.unsubscribe(&erased);
        assert!(registry.var_arg_possible(), "flag never resets");
    }

    #[test]
    fn test_var_arg_exact_and_super() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(VarArgListener));

        // Declared Number[] with varargs: exact for Number elements.
        let exact = registry.var_arg_exact(MessageType::of::<Number>());
        assert_eq!(exact.len(), 1);

        // Integer elements reach it through the array-covariant supertype
        // walk, because it also accepts subtypes.
        let supers = registry.var_arg_super(MessageType::of::<Integer>());
        assert_eq!(supers.len(), 1);

        // Unrelated element type: neither bucket.
        assert!(registry.var_arg_exact(MessageType::of::<Word>()).is_empty());
        assert!(registry.var_arg_super(MessageType::of::<Word>()).is_empty());
    }

    #[test]
    fn test_var_arg_super_tuple_degenerates_to_single() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(VarArgListener));

        let tys = [MessageType::of::<Integer>(), MessageType::of::<Integer>()];
        let tuple = registry.var_arg_super_tuple(&tys);
        assert_eq!(tuple.len(), 1);
    }

    // --- Cache coherence ---

    #[test]
    fn test_caches_cleared_on_subscribe_and_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(NumberListener));

        // Populate the super cache.
        let first = registry.subscriptions_super(MessageType::of::<Integer>());
        assert_eq!(first.len(), 1);
        assert!(!registry.caches_empty());

        // A new subscribe clears it...
        registry.subscribe(Arc::new(IntListener::default()));
        assert!(registry.caches_empty());

        // ...and the next query recomputes from the mutated registry.
        let second = registry.subscriptions_super(MessageType::of::<Integer>());
        assert_eq!(second.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));

        // Unsubscribe clears as well.
        let listener: Arc<dyn Listener> = Arc::new(NumberListener);
        registry.subscribe(listener.clone());
        let _ = registry.subscriptions_super(MessageType::of::<Integer>());
        registry.unsubscribe(&listener);
        assert!(registry.caches_empty());
    }

    #[test]
    fn test_cached_query_hits_return_shared_list() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(Arc::new(NumberListener));

        let first = registry.subscriptions_super(MessageType::of::<Integer>());
        let second = registry.subscriptions_super(MessageType::of::<Integer>());
        assert!(Arc::ptr_eq(&first, &second));
    }

    // --- Ordering contract ---

    #[test]
    fn test_insertion_order_is_preserved() {
        #[derive(Default)]
        struct First;
        impl Listener for First {
            fn handlers(&self) -> Vec<Handler> {
                vec![Handler::one_with_subtypes(
                    &NUMBER,
                    |_: &First, _: &dyn Message| Ok(()),
                )]
            }
            fn as_any(&self) -> &(dyn Any + Send + Sync) {
                self
            }
        }

        #[derive(Default)]
        struct Second;
        impl Listener for Second {
            fn handlers(&self) -> Vec<Handler> {
                vec![Handler::one_with_subtypes(
                    &NUMBER,
                    |_: &Second, _: &dyn Message| Ok(()),
                )]
            }
            fn as_any(&self) -> &(dyn Any + Send + Sync) {
                self
            }
        }

        let registry = SubscriptionRegistry::new();
        let first = Arc::new(First);
        let second = Arc::new(Second);
        registry.subscribe(first);
        registry.subscribe(second);

        let exact = registry.subscriptions_exact(MessageType::of::<Number>());
        assert_eq!(exact.len(), 2);
        assert_eq!(exact[0].listener_count(), 1);

        let supers = registry.subscriptions_super(MessageType::of::<Integer>());
        assert_eq!(supers.len(), 2);
        // Same order as the exact index: insertion order.
        assert!(Arc::ptr_eq(&supers[0], &exact[0]));
        assert!(Arc::ptr_eq(&supers[1], &exact[1]));
    }

    // --- Concurrency ---

    #[test]
    fn test_concurrent_first_subscribes_converge() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    registry.subscribe(Arc::new(IntListener::default()));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let exact = registry.subscriptions_exact(MessageType::of::<Integer>());
        assert_eq!(exact.len(), 1, "the class registered exactly once");
        assert_eq!(exact[0].listener_count(), 400);
    }
}
