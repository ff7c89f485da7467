//! Shallow trie keyed by message-type sequences.
//!
//! Multi-argument subscriptions are indexed by their exact declared
//! parameter sequence; type identities are pointer-stable, so the children
//! maps use identity hashing via `fxhash`.

use fxhash::FxHashMap;

use crate::hierarchy::MessageType;

pub(crate) struct TypeTrie<V> {
    root: Node<V>,
}

struct Node<V> {
    value: Option<V>,
    children: FxHashMap<MessageType, Node<V>>,
}

impl<V> Node<V> {
    fn empty() -> Self {
        Self {
            value: None,
            children: FxHashMap::default(),
        }
    }
}

impl<V> TypeTrie<V> {
    pub(crate) fn new() -> Self {
        Self {
            root: Node::empty(),
        }
    }

    /// Value stored under the exact key sequence.
    pub(crate) fn get(&self, keys: &[MessageType]) -> Option<&V> {
        let mut node = &self.root;
        for key in keys {
            node = node.children.get(key)?;
        }
        node.value.as_ref()
    }

    /// Stores `value` under `keys`, returning any previous value.
    pub(crate) fn insert(&mut self, keys: &[MessageType], value: V) -> Option<V> {
        self.node_mut(keys).value.replace(value)
    }

    /// Mutable access to the value under `keys`, inserting a default first
    /// when absent.
    pub(crate) fn get_or_insert_with(
        &mut self,
        keys: &[MessageType],
        default: impl FnOnce() -> V,
    ) -> &mut V {
        let node = self.node_mut(keys);
        node.value.get_or_insert_with(default)
    }

    /// Drops every stored value and interior node.
    pub(crate) fn clear(&mut self) {
        self.root.value = None;
        self.root.children.clear();
    }

    fn node_mut(&mut self, keys: &[MessageType]) -> &mut Node<V> {
        let mut node = &mut self.root;
        for key in keys {
            node = node.children.entry(*key).or_insert_with(Node::empty);
        }
        node
    }
}

impl<V> Default for TypeTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}
