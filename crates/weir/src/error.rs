//! System-level evaluation errors.

use std::fmt;
use std::sync::Arc;

/// Errors produced by the engine or by evaluators.
///
/// These are distinct from domain errors, which travel inside committed
/// values. An [`EvalError`] other than [`Restart`](EvalError::Restart) is a
/// first-class graph value: it is committed as the payload of its node and
/// propagates to reverse deps that do not catch it with
/// [`Environment::get_value_or_error`](crate::Environment::get_value_or_error).
///
/// `Clone` is cheap: the underlying cause of an
/// [`Evaluation`](EvalError::Evaluation) error is shared behind an `Arc`.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// The evaluator needs inputs it did not have; the runtime will call it
    /// again once they are available. Never committed to a node.
    Restart,

    /// The evaluator reported a structured failure for its key.
    Evaluation {
        /// Debug representation of the failing key.
        key: String,
        /// Human-readable failure description.
        message: String,
        /// The underlying cause, when one exists; exposed through
        /// [`std::error::Error::source`].
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// A dependency cycle was detected; `path` lists the members in
    /// declaration order.
    Cycle {
        /// Debug representations of the keys forming the cycle.
        path: Vec<String>,
    },

    /// No evaluator is registered for the key's function tag. Fatal: the
    /// whole evaluation aborts regardless of keep-going mode.
    MissingEvaluator {
        /// Name of the unregistered tag.
        tag: &'static str,
    },

    /// The evaluation was cancelled before this node committed.
    Cancelled,
}

impl EvalError {
    /// Convenience constructor for evaluator failures.
    pub fn evaluation(key: &crate::Key, message: impl Into<String>) -> Self {
        EvalError::Evaluation {
            key: format!("{key:?}"),
            message: message.into(),
            source: None,
        }
    }

    /// Evaluator failure wrapping an underlying cause.
    pub fn evaluation_with_source(
        key: &crate::Key,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EvalError::Evaluation {
            key: format!("{key:?}"),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// True for the restart sentinel.
    pub fn is_restart(&self) -> bool {
        matches!(self, EvalError::Restart)
    }

    /// True for cycle errors.
    pub fn is_cycle(&self) -> bool {
        matches!(self, EvalError::Cycle { .. })
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Restart => f.write_str("evaluation restarted: missing dependencies"),
            EvalError::Evaluation { key, message, .. } => {
                write!(f, "evaluation of {key} failed: {message}")
            }
            EvalError::Cycle { path } => {
                write!(f, "dependency cycle detected: {}", path.join(" -> "))
            }
            EvalError::MissingEvaluator { tag } => {
                write!(f, "no evaluator registered for tag {tag}")
            }
            EvalError::Cancelled => f.write_str("evaluation cancelled"),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvalError::Evaluation {
                source: Some(source),
                ..
            } => Some(source.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}
