//! Values, committed payloads, and graph versions.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::EvalError;

/// Graph version counter.
///
/// Bumped once per top-level evaluation. A node records the version at which
/// its value last changed; a dep counts as changed for a parent when that
/// version is newer than the parent's last build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version(pub u64);

impl Version {
    /// The version before any evaluation ran.
    pub const ZERO: Self = Self(0);
}

/// Opaque value payload produced by an evaluator.
///
/// Blanket-implemented for every `PartialEq + Debug + Send + Sync + 'static`
/// type. The dynamic equality is used for exactly one thing: change pruning.
/// A rebuilt node whose new value is equal to its previous one does not
/// propagate change to its reverse deps.
pub trait Value: Any + Debug + Send + Sync {
    /// Equality as supplied by the value type; false across concrete types.
    fn dyn_eq(&self, other: &dyn Value) -> bool;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T> Value for T
where
    T: PartialEq + Debug + Send + Sync + 'static,
{
    fn dyn_eq(&self, other: &dyn Value) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Value {
    /// Downcast a value to a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// The committed payload of a done node: a value, an error, or both.
///
/// A node may finish "done with an error"; the error then rides in the value
/// slot and propagates to reverse deps that do not catch it. When both parts
/// are present (an evaluator produced a usable value but also reported a
/// structured failure), change pruning compares the value part only.
#[derive(Clone)]
pub struct NodeValue {
    value: Option<Arc<dyn Value>>,
    error: Option<EvalError>,
}

impl NodeValue {
    /// A successful payload.
    pub fn from_value(value: Arc<dyn Value>) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// An error payload with no usable value.
    pub fn from_error(error: EvalError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// A value with a piggybacked error.
    pub fn with_error(value: Arc<dyn Value>, error: EvalError) -> Self {
        Self {
            value: Some(value),
            error: Some(error),
        }
    }

    /// The value part, if any.
    pub fn value(&self) -> Option<&Arc<dyn Value>> {
        self.value.as_ref()
    }

    /// The error part, if any.
    pub fn error(&self) -> Option<&EvalError> {
        self.error.as_ref()
    }

    /// True when an error is present.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Change-pruning equality: both payloads carry values, no errors, and
    /// the values compare equal. Anything involving an error counts as
    /// changed so that errors always propagate.
    pub(crate) fn prunes_against(&self, previous: &NodeValue) -> bool {
        if self.error.is_some() || previous.error.is_some() {
            return false;
        }
        match (&self.value, &previous.value) {
            (Some(new), Some(old)) => new.dyn_eq(old.as_ref()),
            _ => false,
        }
    }
}

impl Debug for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, &self.error) {
            (Some(value), None) => write!(f, "{value:?}"),
            (None, Some(error)) => write!(f, "error: {error}"),
            (Some(value), Some(error)) => write!(f, "{value:?} (error: {error})"),
            (None, None) => f.write_str("<empty>"),
        }
    }
}
