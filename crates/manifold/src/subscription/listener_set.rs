//! Copy-on-write concurrent listener set.
//!
//! Publish iterates a snapshot while subscribe/unsubscribe of other
//! instances proceed: readers clone an `Arc` out of the lock and iterate
//! outside it, writers replace the whole slice. Small sets make the copy
//! cheap, and iteration may miss concurrently-added listeners, which the
//! bus contract allows.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::handler::Listener;

/// Identity comparison for listener instances: same `Arc` allocation.
///
/// Compares the thin data pointers so that the same allocation observed
/// through different trait-object coercions still matches.
pub(crate) fn same_instance(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<u8>(),
        Arc::as_ptr(b).cast::<u8>(),
    )
}

pub(crate) struct ListenerSet {
    inner: RwLock<Arc<[Arc<dyn Listener>]>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        let empty: Arc<[Arc<dyn Listener>]> = Arc::new([]);
        Self {
            inner: RwLock::new(empty),
        }
    }

    /// Appends a listener. Repeated adds of the same instance are kept as
    /// duplicates; the bus documents that repeated subscribes may deliver
    /// repeatedly.
    pub(crate) fn add(&self, listener: Arc<dyn Listener>) {
        let mut guard = self.inner.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = next.into();
    }

    /// Removes every occurrence of `listener`. Returns whether anything was
    /// removed; absent listeners are a no-op.
    pub(crate) fn remove(&self, listener: &Arc<dyn Listener>) -> bool {
        let mut guard = self.inner.write();
        let before = guard.len();
        let next: Vec<Arc<dyn Listener>> = guard
            .iter()
            .filter(|existing| !same_instance(existing, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        if removed {
            *guard = next.into();
        }
        removed
    }

    /// A consistent snapshot for iteration.
    pub(crate) fn snapshot(&self) -> Arc<[Arc<dyn Listener>]> {
        Arc::clone(&self.inner.read())
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }
}
