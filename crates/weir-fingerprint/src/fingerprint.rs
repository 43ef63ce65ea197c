//! Fingerprints and deserialization-context distinguishers.

use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A collision-resistant digest of a serialized value: a 32-byte BLAKE3
/// hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of serialized contents.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Wrap an existing digest.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("..")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Extra key component carrying the context needed to deserialize a value
/// when the fingerprint alone is ambiguous.
///
/// If parent and child share a common subvalue, serializing the child may
/// omit it because the parent reinjects it during deserialization; the
/// child's fingerprint then says nothing about the shared part, and two
/// children from different parents can collide. A distinguisher
/// encapsulates that context and becomes part of the cache key.
///
/// Blanket-implemented for every `Eq + Hash + Debug + Send + Sync +
/// 'static` type.
pub trait Distinguisher: Any + Debug + Send + Sync {
    /// Dynamic equality; false when the concrete types differ.
    fn dyn_eq(&self, other: &dyn Distinguisher) -> bool;

    /// Dynamic hash, salted with the concrete type.
    fn dyn_hash(&self) -> u64;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T> Distinguisher for T
where
    T: Eq + Hash + Debug + Send + Sync + 'static,
{
    fn dyn_eq(&self, other: &dyn Distinguisher) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        std::any::TypeId::of::<T>().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Deserialization-cache key: a fingerprint, optionally extended with a
/// distinguisher.
#[derive(Clone)]
pub(crate) struct FingerprintKey {
    fingerprint: Fingerprint,
    distinguisher: Option<Arc<dyn Distinguisher>>,
}

impl FingerprintKey {
    pub(crate) fn new(
        fingerprint: Fingerprint,
        distinguisher: Option<Arc<dyn Distinguisher>>,
    ) -> Self {
        Self {
            fingerprint,
            distinguisher,
        }
    }
}

impl PartialEq for FingerprintKey {
    fn eq(&self, other: &Self) -> bool {
        if self.fingerprint != other.fingerprint {
            return false;
        }
        match (&self.distinguisher, &other.distinguisher) {
            (None, None) => true,
            (Some(a), Some(b)) => a.dyn_eq(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for FingerprintKey {}

impl Hash for FingerprintKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
        if let Some(distinguisher) = &self.distinguisher {
            state.write_u64(distinguisher.dyn_hash());
        }
    }
}

impl Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.distinguisher {
            None => write!(f, "{:?}", self.fingerprint),
            Some(d) => write!(f, "{:?}/{d:?}", self.fingerprint),
        }
    }
}
