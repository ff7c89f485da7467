//! Memoized dispatch caches, cleared on every registry write.
//!
//! Writes (subscribe/unsubscribe) are rare next to reads, so the caches
//! trade recomputation on mutation for coherent, lock-cheap reads: entries
//! are filled by readers observing a stable registry snapshot and published
//! as immutable `Arc` slices. Each cache has its own leaf lock; fills never
//! take the registry write lock.

use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::hierarchy::MessageType;

use super::subscription::Subscription;
use super::trie::TypeTrie;

/// Immutable shared snapshot of matching subscriptions.
pub type SubscriptionList = Arc<[Arc<Subscription>]>;

/// A shared empty list; cloned instead of allocating per miss.
pub(crate) fn empty_list() -> SubscriptionList {
    static EMPTY: std::sync::OnceLock<SubscriptionList> = std::sync::OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| Arc::new([])))
}

// ---------------------------------------------------------------------------
// SuperCache
// ---------------------------------------------------------------------------

/// Memoized supertype matches: for a posted type (or tuple), the
/// subscriptions declared on a strict supertype that accept subtypes.
pub(crate) struct SuperCache {
    single: RwLock<FxHashMap<MessageType, SubscriptionList>>,
    tuple: RwLock<TypeTrie<SubscriptionList>>,
}

impl SuperCache {
    pub(crate) fn new() -> Self {
        Self {
            single: RwLock::new(FxHashMap::default()),
            tuple: RwLock::new(TypeTrie::new()),
        }
    }

    pub(crate) fn single(&self, ty: MessageType) -> Option<SubscriptionList> {
        self.single.read().get(&ty).cloned()
    }

    pub(crate) fn store_single(&self, ty: MessageType, list: SubscriptionList) {
        self.single.write().insert(ty, list);
    }

    pub(crate) fn tuple(&self, keys: &[MessageType]) -> Option<SubscriptionList> {
        self.tuple.read().get(keys).cloned()
    }

    pub(crate) fn store_tuple(&self, keys: &[MessageType], list: SubscriptionList) {
        self.tuple.write().insert(keys, list);
    }

    pub(crate) fn clear(&self) {
        self.single.write().clear();
        self.tuple.write().clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.single.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// VarArgCache
// ---------------------------------------------------------------------------

/// Memoized variadic matches for a posted element type `T`:
/// subscriptions declared `T[]` that accept varargs (`exact`), and
/// subscriptions declared `S[]` for a proper supertype `S` that accept both
/// subtypes and varargs (`supers`, with a tuple variant).
pub(crate) struct VarArgCache {
    exact: RwLock<FxHashMap<MessageType, SubscriptionList>>,
    supers: RwLock<FxHashMap<MessageType, SubscriptionList>>,
    super_tuple: RwLock<TypeTrie<SubscriptionList>>,
}

impl VarArgCache {
    pub(crate) fn new() -> Self {
        Self {
            exact: RwLock::new(FxHashMap::default()),
            supers: RwLock::new(FxHashMap::default()),
            super_tuple: RwLock::new(TypeTrie::new()),
        }
    }

    pub(crate) fn exact(&self, ty: MessageType) -> Option<SubscriptionList> {
        self.exact.read().get(&ty).cloned()
    }

    pub(crate) fn store_exact(&self, ty: MessageType, list: SubscriptionList) {
        self.exact.write().insert(ty, list);
    }

    pub(crate) fn supers(&self, ty: MessageType) -> Option<SubscriptionList> {
        self.supers.read().get(&ty).cloned()
    }

    pub(crate) fn store_supers(&self, ty: MessageType, list: SubscriptionList) {
        self.supers.write().insert(ty, list);
    }

    pub(crate) fn super_tuple(&self, keys: &[MessageType]) -> Option<SubscriptionList> {
        self.super_tuple.read().get(keys).cloned()
    }

    pub(crate) fn store_super_tuple(&self, keys: &[MessageType], list: SubscriptionList) {
        self.super_tuple.write().insert(keys, list);
    }

    pub(crate) fn clear(&self) {
        self.exact.write().clear();
        self.supers.write().clear();
        self.super_tuple.write().clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.exact.read().is_empty() && self.supers.read().is_empty()
    }
}
