//! The per-invocation environment handed to evaluators.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::EvalError;
use crate::events::Listener;
use crate::key::{Argument, FunctionTag, Key};
use crate::node::{GroupedDeps, NodeEntry};
use crate::runtime::{EngineShared, Scheduler};
use crate::state::ComputeState;
use crate::value::Value;

/// The environment through which an evaluator declares its inputs.
///
/// Dep values are only observable here. A value request for a dep that is
/// not done yet records the dep and returns `None`; the evaluator should
/// then return [`EvalError::Restart`] (checking [`values_missing`]
/// first) and will be re-invoked once the deps finish.
///
/// [`values_missing`]: Environment::values_missing
pub struct Environment<'a> {
    shared: &'a EngineShared,
    scheduler: &'a Arc<Scheduler>,
    entry: &'a Arc<NodeEntry>,
    key: Key,
    /// Deps declared by earlier runs (and verified dirty-check groups).
    prev_declared: HashSet<Key, ahash::RandomState>,
    /// Every dep declared during this run, in call order.
    run_declared: GroupedDeps,
    run_declared_set: HashSet<Key, ahash::RandomState>,
    /// Deps declared this run that earlier runs had not declared.
    newly_declared: GroupedDeps,
    missing: bool,
    dep_errors: Vec<EvalError>,
}

impl<'a> Environment<'a> {
    pub(crate) fn new(
        shared: &'a EngineShared,
        scheduler: &'a Arc<Scheduler>,
        entry: &'a Arc<NodeEntry>,
    ) -> Self {
        let key = entry.key().clone();
        let with_index = key.tag().skips_batch_prefetch();
        Self {
            shared,
            scheduler,
            entry,
            key,
            prev_declared: entry.temporary_snapshot().to_key_set(),
            run_declared: GroupedDeps::new(with_index),
            run_declared_set: HashSet::default(),
            newly_declared: GroupedDeps::new(false),
            missing: false,
            dep_errors: Vec::new(),
        }
    }

    /// The key being computed.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Intern a dep key in the engine's interner.
    pub fn intern<A: Argument>(&self, tag: FunctionTag, arg: A) -> Key {
        self.shared.interner.intern(tag, arg)
    }

    /// Declare `dep` and return its value if it is done and error-free.
    ///
    /// Returns `None` (and marks values missing) when the dep is not yet
    /// computed or finished with an error; the error, if any, propagates
    /// automatically unless caught with [`get_value_or_error`].
    ///
    /// [`get_value_or_error`]: Environment::get_value_or_error
    pub fn get_value(&mut self, dep: &Key) -> Option<Arc<dyn Value>> {
        self.get_value_or_error(dep).unwrap_or(None)
    }

    /// Declare `dep` and return its value, surfacing a dep error to the
    /// caller instead of propagating it. An evaluator may catch the error
    /// and still produce its own value.
    pub fn get_value_or_error(
        &mut self,
        dep: &Key,
    ) -> Result<Option<Arc<dyn Value>>, EvalError> {
        self.declare(std::slice::from_ref(dep));
        self.read(dep)
    }

    /// Declare a group of deps together; members may be fetched in
    /// parallel. The result is aligned with the input and partial: `None`
    /// marks deps that are not done (or finished with an error).
    pub fn get_values(&mut self, deps: &[Key]) -> Vec<Option<Arc<dyn Value>>> {
        self.declare(deps);
        deps.iter()
            .map(|dep| self.read(dep).unwrap_or(None))
            .collect()
    }

    /// True when any declared dep was not available; the evaluator should
    /// return [`EvalError::Restart`].
    pub fn values_missing(&self) -> bool {
        self.missing
    }

    /// True when the evaluation has been cancelled; long-running evaluators
    /// should check this at convenient points and return
    /// [`EvalError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// The engine's listener.
    pub fn get_listener(&self) -> &dyn Listener {
        self.shared.listener.as_ref()
    }

    /// Post a diagnostic attributed to the current key.
    pub fn post_event(&self, message: impl AsRef<str>) {
        self.shared
            .listener
            .on_diagnostic(&self.key, message.as_ref());
    }

    /// Register a wait on an out-of-band event without naming a dep key.
    /// The node stays evaluating until the returned handle is signaled (or
    /// dropped).
    pub fn add_external_dep(&mut self) -> ExternalDep {
        self.entry.add_external_dep();
        ExternalDep {
            entry: Arc::clone(self.entry),
            scheduler: Arc::clone(self.scheduler),
            signaled: false,
        }
    }

    /// Fetch (or create) the per-key compute state, which survives restarts
    /// of this evaluation.
    pub fn get_state<S, F>(&self, factory: F) -> Arc<S>
    where
        S: ComputeState,
        F: FnOnce() -> S,
    {
        self.shared.states.get_or_create(&self.key, factory)
    }

    /// The committed error of a declared dep, if it finished with one.
    pub fn dep_error_for(&self, dep: &Key) -> Option<EvalError> {
        let entry = self.shared.store.get(dep)?;
        if !entry.is_done() {
            return None;
        }
        entry.node_value().and_then(|v| v.error().cloned())
    }

    fn declare(&mut self, deps: &[Key]) {
        let mut group = Vec::new();
        let mut new_group = Vec::new();
        for dep in deps {
            if self.run_declared_set.insert(dep.clone()) {
                group.push(dep.clone());
                if !self.prev_declared.contains(dep) {
                    new_group.push(dep.clone());
                }
            }
        }
        self.run_declared.append_group(group);
        self.newly_declared.append_group(new_group);
    }

    fn read(&mut self, dep: &Key) -> Result<Option<Arc<dyn Value>>, EvalError> {
        if let Some(entry) = self.shared.store.get(dep) {
            if entry.is_done() {
                let payload = entry.node_value().expect("done node has a payload");
                if let Some(error) = payload.error() {
                    self.missing = true;
                    self.dep_errors.push(error.clone());
                    return Err(error.clone());
                }
                return Ok(payload.value().cloned());
            }
        }
        self.missing = true;
        Ok(None)
    }

    pub(crate) fn into_parts(self) -> EnvParts {
        EnvParts {
            run_declared: self.run_declared,
            newly_declared: self.newly_declared,
            missing: self.missing,
            dep_errors: self.dep_errors,
        }
    }
}

/// What an evaluator run declared and observed; consumed by the runtime.
pub(crate) struct EnvParts {
    pub(crate) run_declared: GroupedDeps,
    pub(crate) newly_declared: GroupedDeps,
    pub(crate) missing: bool,
    pub(crate) dep_errors: Vec<EvalError>,
}

/// Completion handle for an external (keyless) dep.
///
/// The node stays evaluating until [`signal`](ExternalDep::signal) is
/// called; dropping the handle unsignaled counts as a signal so an
/// abandoned wait cannot wedge the evaluation.
pub struct ExternalDep {
    entry: Arc<NodeEntry>,
    scheduler: Arc<Scheduler>,
    signaled: bool,
}

impl ExternalDep {
    /// Signal completion of the external event, re-scheduling the node if
    /// it became ready.
    pub fn signal(mut self) {
        self.signal_once();
    }

    fn signal_once(&mut self) {
        if self.signaled {
            return;
        }
        self.signaled = true;
        if self.entry.signal_external_dep() {
            self.scheduler.push(self.entry.key().clone());
        }
    }
}

impl Drop for ExternalDep {
    fn drop(&mut self) {
        self.signal_once();
    }
}
