//! Type identity and the supertype oracle.
//!
//! Every publishable type carries a static [`TypeInfo`] descriptor naming its
//! direct parents. [`MessageType`] is the runtime identity key used by every
//! registry table: a scalar type or the array of a scalar type.
//!
//! [`TypeHierarchy`] answers "all transitive supertypes of T" in a
//! deterministic breadth-first order. Results are memoized for the lifetime
//! of the process: the type graph is fixed at compile time, so entries are
//! computed once and never invalidated.

use std::any::TypeId;
use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};
use parking_lot::RwLock;

// ---------------------------------------------------------------------------
// TypeInfo
// ---------------------------------------------------------------------------

/// Static descriptor for a publishable type.
///
/// One `TypeInfo` exists per message type, usually declared through the
/// [`impl_message!`](crate::impl_message) macro. The descriptor records the
/// type's name, its [`TypeId`] constructor, and its direct parents in the
/// publication hierarchy.
pub struct TypeInfo {
    name: &'static str,
    id: fn() -> TypeId,
    parents: &'static [&'static TypeInfo],
}

impl TypeInfo {
    /// Creates a descriptor. `id` is the `TypeId::of::<T>` function item for
    /// the described type; `parents` lists direct supertypes, nearest first.
    #[must_use]
    pub const fn new(
        name: &'static str,
        id: fn() -> TypeId,
        parents: &'static [&'static TypeInfo],
    ) -> Self {
        Self { name, id, parents }
    }

    /// The declared type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runtime identity of the described type.
    #[must_use]
    pub fn id(&self) -> TypeId {
        (self.id)()
    }

    /// Direct parents, in declaration order.
    #[must_use]
    pub fn parents(&self) -> &'static [&'static TypeInfo] {
        self.parents
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TypeInfo {}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("parents", &self.parents.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Runtime type identity of a posted value.
///
/// Either a scalar message type or the array of a scalar element type.
/// Totally ordered by identity so it can key ordered and hashed containers
/// alike; equality ignores descriptor addresses and compares the underlying
/// [`TypeId`] plus the scalar/array kind.
#[derive(Clone, Copy)]
pub enum MessageType {
    /// A plain message type.
    Scalar(&'static TypeInfo),
    /// An ordered sequence of `element` values, posted and matched as a unit.
    Array(&'static TypeInfo),
}

impl MessageType {
    /// The descriptor behind this key (the element descriptor for arrays).
    #[must_use]
    pub fn info(self) -> &'static TypeInfo {
        match self {
            Self::Scalar(info) | Self::Array(info) => info,
        }
    }

    /// True for array keys.
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// The array type whose elements are `self`.
    ///
    /// Arrays of arrays are not publishable, so this returns `None` for
    /// array keys.
    #[must_use]
    pub fn array_of(self) -> Option<Self> {
        match self {
            Self::Scalar(info) => Some(Self::Array(info)),
            Self::Array(_) => None,
        }
    }

    fn rank(self) -> (u8, TypeId) {
        match self {
            Self::Scalar(info) => (0, info.id()),
            Self::Array(info) => (1, info.id()),
        }
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
    }
}

impl PartialOrd for MessageType {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageType {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(info) => write!(f, "{}", info.name()),
            Self::Array(info) => write!(f, "{}[]", info.name()),
        }
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({self})")
    }
}

// ---------------------------------------------------------------------------
// TypeHierarchy
// ---------------------------------------------------------------------------

/// Memoized supertype oracle.
///
/// Supertype sequences are computed once per key and published as immutable
/// `Arc` slices; the memo table is never invalidated because the type graph
/// cannot change while the process runs.
pub struct TypeHierarchy {
    supers: RwLock<FxHashMap<MessageType, Arc<[MessageType]>>>,
}

impl TypeHierarchy {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supers: RwLock::new(FxHashMap::default()),
        }
    }

    /// All proper supertypes of `ty`, breadth-first from the direct parents,
    /// deduplicated. Empty for root types.
    ///
    /// Array keys are covariant: the supertypes of `T[]` are `S[]` for every
    /// supertype `S` of `T`.
    #[must_use]
    pub fn supertypes(&self, ty: MessageType) -> Arc<[MessageType]> {
        if let Some(hit) = self.supers.read().get(&ty) {
            return Arc::clone(hit);
        }

        let ancestors = walk_parents(ty.info());
        let computed: Arc<[MessageType]> = match ty {
            MessageType::Scalar(_) => {
                ancestors.into_iter().map(MessageType::Scalar).collect()
            }
            MessageType::Array(_) => {
                ancestors.into_iter().map(MessageType::Array).collect()
            }
        };

        let mut supers = self.supers.write();
        // Two readers may race to fill the same key; keep the first entry so
        // callers observing an Arc never see it replaced.
        Arc::clone(supers.entry(ty).or_insert(computed))
    }

    /// Number of memoized entries (test and diagnostics hook).
    #[must_use]
    pub fn memoized_len(&self) -> usize {
        self.supers.read().len()
    }
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHierarchy")
            .field("memoized", &self.memoized_len())
            .finish()
    }
}

/// Breadth-first walk over direct parents, excluding the start type,
/// deduplicated by [`TypeId`].
fn walk_parents(info: &'static TypeInfo) -> Vec<&'static TypeInfo> {
    let mut order = Vec::new();
    let mut seen: FxHashSet<TypeId> = FxHashSet::default();
    seen.insert(info.id());

    let mut queue: VecDeque<&'static TypeInfo> = info.parents().iter().copied().collect();
    while let Some(parent) = queue.pop_front() {
        if seen.insert(parent.id()) {
            order.push(parent);
            queue.extend(parent.parents().iter().copied());
        }
    }
    order
}

// ===========================================================================
// Tests
// ===========================================================================
