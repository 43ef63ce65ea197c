//! Key types for graph nodes.

use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Selects which [`Evaluator`](crate::Evaluator) computes the values of a key,
/// and carries the key's capability bits.
///
/// Tags are compared and hashed by name alone; the capability bits are
/// properties of the evaluator function, not part of the identity.
#[derive(Clone, Copy)]
pub struct FunctionTag {
    name: &'static str,
    skips_batch_prefetch: bool,
    supports_partial_reevaluation: bool,
}

impl FunctionTag {
    /// Create a tag with no capability bits set.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            skips_batch_prefetch: false,
            supports_partial_reevaluation: false,
        }
    }

    /// Store this key's deps in a set-backed structure for faster membership
    /// tests, instead of prefetching them as a batch.
    pub const fn skipping_batch_prefetch(mut self) -> Self {
        self.skips_batch_prefetch = true;
        self
    }

    /// Allow the evaluator to be re-invoked while some of its previously
    /// declared deps are still in flight.
    pub const fn with_partial_reevaluation(mut self) -> Self {
        self.supports_partial_reevaluation = true;
        self
    }

    /// The tag's name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether keys with this tag skip batch prefetching.
    pub const fn skips_batch_prefetch(&self) -> bool {
        self.skips_batch_prefetch
    }

    /// Whether keys with this tag may be re-evaluated with deps in flight.
    pub const fn supports_partial_reevaluation(&self) -> bool {
        self.supports_partial_reevaluation
    }
}

impl PartialEq for FunctionTag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for FunctionTag {}

impl Hash for FunctionTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Debug for FunctionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased key argument.
///
/// Blanket-implemented for every `Eq + Hash + Debug + Send + Sync + 'static`
/// type, so plain tuples, strings, and domain structs all work as arguments.
pub trait Argument: Any + Debug + Send + Sync {
    /// Dynamic equality; false when the concrete types differ.
    fn dyn_eq(&self, other: &dyn Argument) -> bool;

    /// Dynamic hash, salted with the concrete type.
    fn dyn_hash(&self) -> u64;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T> Argument for T
where
    T: Eq + Hash + Debug + Send + Sync + 'static,
{
    fn dyn_eq(&self, other: &dyn Argument) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        TypeId::of::<T>().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct KeyInner {
    tag: FunctionTag,
    arg: Box<dyn Argument>,
    hash: u64,
}

/// Typed identifier of a memoized computation: a (tag, argument) pair.
///
/// Keys are interned through [`Interner`](crate::Interner): value-equal keys
/// canonicalize to the same allocation, so equality is a pointer comparison
/// on the hot path. `Clone` is an `Arc` clone.
#[derive(Clone)]
pub struct Key(pub(crate) Arc<KeyInner>);

impl Key {
    pub(crate) fn from_parts(tag: FunctionTag, arg: Box<dyn Argument>) -> Self {
        let hash = Self::compute_hash(tag, arg.as_ref());
        Key(Arc::new(KeyInner { tag, arg, hash }))
    }

    pub(crate) fn compute_hash(tag: FunctionTag, arg: &dyn Argument) -> u64 {
        let mut hasher = ahash::AHasher::default();
        tag.name().hash(&mut hasher);
        arg.dyn_hash().hash(&mut hasher);
        hasher.finish()
    }

    /// The function tag of this key.
    pub fn tag(&self) -> FunctionTag {
        self.0.tag
    }

    /// Downcast the argument to a concrete type.
    pub fn arg<T: 'static>(&self) -> Option<&T> {
        self.0.arg.as_any().downcast_ref::<T>()
    }

    pub(crate) fn precomputed_hash(&self) -> u64 {
        self.0.hash
    }

    pub(crate) fn arg_dyn(&self) -> &dyn Argument {
        self.0.arg.as_ref()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        // Interned keys are reference-equal; the value comparison only runs
        // for keys from different interners (tests, mixed contexts).
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash
                && self.0.tag == other.0.tag
                && self.0.arg.dyn_eq(other.0.arg.as_ref()))
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.0.tag.name(), self.0.arg)
    }
}
