//! The evaluator contract and the tag -> evaluator registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::env::Environment;
use crate::error::EvalError;
use crate::key::Key;
use crate::value::Value;

/// A user-supplied function computing the value for a key.
///
/// `compute` may be invoked any number of times for the same node: whenever
/// a declared dep is not yet available it returns
/// [`EvalError::Restart`] and is called again once the deps finish. It must
/// therefore be pure with respect to the values observed through the
/// environment and re-declare, before reading, at least the deps previous
/// runs declared. Side effects other than the returned value and posted
/// events are not permitted. Domain errors are reported as
/// [`EvalError::Evaluation`] and become the node's committed payload.
pub trait Evaluator: Send + Sync + 'static {
    /// Compute the value for `key`, declaring deps through `env`.
    fn compute(&self, key: &Key, env: &mut Environment<'_>) -> Result<Arc<dyn Value>, EvalError>;

    /// Called when the engine discards the per-key compute state of `key`
    /// (on commit, cancellation, or deletion).
    fn clean_up_state(&self, _key: &Key) {}
}

impl<F> Evaluator for F
where
    F: Fn(&Key, &mut Environment<'_>) -> Result<Arc<dyn Value>, EvalError>
        + Send
        + Sync
        + 'static,
{
    fn compute(&self, key: &Key, env: &mut Environment<'_>) -> Result<Arc<dyn Value>, EvalError> {
        self(key, env)
    }
}

/// Dispatch table from function-tag name to evaluator.
///
/// Built once by [`EngineBuilder`](crate::EngineBuilder) and read-only
/// afterwards.
pub(crate) struct EvaluatorRegistry {
    evaluators: HashMap<&'static str, Arc<dyn Evaluator>, ahash::RandomState>,
}

impl EvaluatorRegistry {
    pub(crate) fn new() -> Self {
        Self {
            evaluators: HashMap::default(),
        }
    }

    pub(crate) fn insert(&mut self, tag_name: &'static str, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.insert(tag_name, evaluator);
    }

    pub(crate) fn get(&self, tag_name: &str) -> Option<&Arc<dyn Evaluator>> {
        self.evaluators.get(tag_name)
    }
}
