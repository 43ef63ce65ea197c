//! The engine: parallel evaluation driver, invalidation, and idle tasks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::cycles::find_cycles;
use crate::env::Environment;
use crate::error::EvalError;
use crate::events::{Listener, NoopListener, Outcome};
use crate::evaluator::{Evaluator, EvaluatorRegistry};
use crate::interner::Interner;
use crate::key::{Argument, FunctionTag, Key};
use crate::node::{DependencyState, DirtyKind, GroupedDeps, Lifecycle, NodeEntry};
use crate::state::StateMap;
use crate::store::NodeStore;
use crate::value::{NodeValue, Value, Version};

/// State shared between the engine handle, workers, and environments.
pub(crate) struct EngineShared {
    pub(crate) store: NodeStore,
    pub(crate) interner: Interner,
    pub(crate) registry: EvaluatorRegistry,
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) states: StateMap,
    pub(crate) cancelled: AtomicBool,
    version: AtomicU64,
    /// Scheduler of the evaluation in progress, for cancellation.
    current: Mutex<Weak<Scheduler>>,
}

/// Ready queue shared by the worker pool and the coordinating thread.
pub(crate) struct Scheduler {
    state: Mutex<SchedulerState>,
    /// Signaled when work is pushed or the queue closes; workers wait here.
    work: Condvar,
    /// Signaled on quiescence, root completion, errors, and closure; the
    /// coordinator waits here.
    quiet: Condvar,
}

struct SchedulerState {
    queue: VecDeque<Key>,
    in_flight: usize,
    pending_roots: usize,
    closed: bool,
    first_error: Option<EvalError>,
    /// Bumped on every state change the coordinator may be waiting for.
    ticks: u64,
}

impl Scheduler {
    fn new(pending_roots: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                in_flight: 0,
                pending_roots,
                closed: false,
                first_error: None,
                ticks: 0,
            }),
            work: Condvar::new(),
            quiet: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, key: Key) {
        let mut st = self.state.lock();
        if st.closed {
            return;
        }
        st.queue.push_back(key);
        st.ticks += 1;
        self.work.notify_one();
        self.quiet.notify_all();
    }

    fn close(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        st.ticks += 1;
        self.work.notify_all();
        self.quiet.notify_all();
    }

    /// Record an error; with `abort` the queue also closes so workers
    /// drain.
    fn record_error(&self, error: EvalError, abort: bool) {
        let mut st = self.state.lock();
        if st.first_error.is_none() {
            st.first_error = Some(error);
        }
        if abort {
            st.closed = true;
            self.work.notify_all();
        }
        st.ticks += 1;
        self.quiet.notify_all();
    }

    fn root_done(&self) {
        let mut st = self.state.lock();
        st.pending_roots -= 1;
        st.ticks += 1;
        if st.pending_roots == 0 {
            self.quiet.notify_all();
        }
    }
}

/// How one top-level evaluation ended.
enum Wake {
    /// Every root is done.
    Finished,
    /// Fail-fast error, fatal error, or cancellation.
    Aborted,
    /// Queue drained with roots pending; analyze for cycles or externals.
    Quiescent { ticks: u64 },
}

/// One dependency cycle found during evaluation.
#[derive(Debug, Clone)]
pub struct CycleInfo {
    /// The keys on the cycle.
    pub path: Vec<Key>,
}

/// Result of [`Engine::evaluate`]: one payload per completed root, the
/// cycles encountered, and the aborting error if the evaluation did not run
/// to completion.
#[derive(Debug)]
pub struct EvaluationResult {
    results: HashMap<Key, NodeValue, ahash::RandomState>,
    first_error: Option<EvalError>,
    cycles: Vec<CycleInfo>,
}

impl EvaluationResult {
    fn empty() -> Self {
        Self {
            results: HashMap::default(),
            first_error: None,
            cycles: Vec::new(),
        }
    }

    /// The committed value of a root; the error, if any, is reported by
    /// [`error`](EvaluationResult::error).
    pub fn get(&self, root: &Key) -> Option<&Arc<dyn Value>> {
        self.results.get(root).and_then(|v| v.value())
    }

    /// The error payload of a root, or the aborting error when the
    /// evaluation stopped before the root finished.
    pub fn error(&self, root: &Key) -> Option<&EvalError> {
        match self.results.get(root) {
            Some(payload) => payload.error(),
            None => self.first_error.as_ref(),
        }
    }

    /// The full committed payload of a root.
    pub fn node_value(&self, root: &Key) -> Option<&NodeValue> {
        self.results.get(root)
    }

    /// The error that aborted the evaluation, if it did not run to
    /// completion.
    pub fn first_error(&self) -> Option<&EvalError> {
        self.first_error.as_ref()
    }

    /// Cycles found during this evaluation.
    pub fn cycles(&self) -> &[CycleInfo] {
        &self.cycles
    }

    /// True when the evaluation aborted or any root carries an error.
    pub fn has_error(&self) -> bool {
        self.first_error.is_some() || self.results.values().any(NodeValue::is_error)
    }

    /// Number of completed roots.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no root completed.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    workers: usize,
    listener: Arc<dyn Listener>,
    registry: EvaluatorRegistry,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Start building an engine with default worker count and a no-op
    /// listener.
    pub fn new() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            listener: Arc::new(NoopListener),
            registry: EvaluatorRegistry::new(),
        }
    }

    /// Size of the worker pool.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Install a listener.
    pub fn listener(mut self, listener: impl Listener) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Register the evaluator for a function tag.
    pub fn register(mut self, tag: FunctionTag, evaluator: impl Evaluator) -> Self {
        self.registry.insert(tag.name(), Arc::new(evaluator));
        self
    }

    /// Build the engine.
    pub fn build(self) -> Engine {
        Engine {
            shared: Arc::new(EngineShared {
                store: NodeStore::new(),
                interner: Interner::new(),
                registry: self.registry,
                listener: self.listener,
                states: StateMap::new(),
                cancelled: AtomicBool::new(false),
                version: AtomicU64::new(0),
                current: Mutex::new(Weak::new()),
            }),
            workers: self.workers,
            idle: Mutex::new(None),
        }
    }
}

/// The incremental evaluation engine.
///
/// One engine owns one node store and one key interner; create it at
/// startup through [`EngineBuilder`] and drop it at shutdown.
pub struct Engine {
    shared: Arc<EngineShared>,
    workers: usize,
    idle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Engine {
    /// Shorthand for [`EngineBuilder::new`].
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Intern a key in this engine's interner.
    pub fn intern<A: Argument>(&self, tag: FunctionTag, arg: A) -> Key {
        self.shared.interner.intern(tag, arg)
    }

    /// The engine's key interner.
    pub fn interner(&self) -> &Interner {
        &self.shared.interner
    }

    /// Evaluate `roots`, reusing everything the graph already knows.
    ///
    /// With `keep_going` the evaluation runs to fixed point past errors and
    /// collects a payload per root; otherwise the first committed error (or
    /// cycle) aborts and is reported as [`EvaluationResult::first_error`].
    pub fn evaluate(&self, roots: &[Key], keep_going: bool) -> EvaluationResult {
        self.finish_idle();
        self.shared.cancelled.store(false, Ordering::Relaxed);
        let version = Version(self.shared.version.fetch_add(1, Ordering::Relaxed) + 1);
        self.shared.listener.on_evaluation_started(version, roots);
        if roots.is_empty() {
            self.shared.listener.on_evaluation_finished(version);
            return EvaluationResult::empty();
        }

        let mut unique_roots: Vec<Key> = Vec::new();
        for root in roots {
            if !unique_roots.contains(root) {
                unique_roots.push(root.clone());
            }
        }

        // Request every root before counting the pending ones.
        let mut to_schedule = Vec::new();
        let mut pending = 0usize;
        for root in &unique_roots {
            let entry = self.shared.store.create_if_absent(root);
            match entry.add_reverse_dep_and_check_if_done(None) {
                DependencyState::AlreadyDone => {}
                DependencyState::NeedsScheduling => {
                    pending += 1;
                    to_schedule.push(root.clone());
                }
                DependencyState::AlreadyEvaluating => pending += 1,
            }
        }

        let scheduler = Arc::new(Scheduler::new(pending));
        *self.shared.current.lock() = Arc::downgrade(&scheduler);
        let ctx = EvalContext {
            shared: &self.shared,
            scheduler: &scheduler,
            version,
            keep_going,
            roots: unique_roots.iter().cloned().collect(),
        };
        for key in to_schedule {
            scheduler.push(key);
        }

        let mut cycles = Vec::new();
        if pending > 0 {
            std::thread::scope(|scope| {
                for _ in 0..self.workers {
                    scope.spawn(|| ctx.worker_loop());
                }
                ctx.coordinate(&mut cycles);
                scheduler.close();
            });
        }
        *self.shared.current.lock() = Weak::new();

        // Abandoned evaluations (cancellation, fail-fast, orphans of a
        // partial commit) must not leak Evaluating nodes into the next
        // request.
        for entry in self.shared.store.entries() {
            if entry.in_flight() {
                entry.reset_in_flight();
                self.shared.states.discard(entry.key());
            }
        }
        self.shared.states.discard_all();

        let first_error = scheduler.state.lock().first_error.clone();
        let mut results: HashMap<Key, NodeValue, ahash::RandomState> = HashMap::default();
        for root in &unique_roots {
            if let Some(entry) = self.shared.store.get(root) {
                if entry.is_done() {
                    if let Some(payload) = entry.node_value() {
                        results.insert(root.clone(), payload);
                    }
                }
            }
        }
        self.shared.listener.on_evaluation_finished(version);
        EvaluationResult {
            results,
            first_error,
            cycles,
        }
    }

    /// Report that the values of `keys` changed externally: the keys are
    /// forced to re-evaluate and their reverse deps re-validate on the next
    /// request.
    pub fn invalidate(&self, keys: &[Key]) {
        self.shared.store.mark_dirty_transitive(
            keys,
            DirtyKind::Changed,
            self.shared.listener.as_ref(),
        );
    }

    /// Mark `keys` (and transitively their reverse deps) as possibly
    /// affected without asserting a value change; re-evaluation may be
    /// skipped by change pruning.
    pub fn mark_affected(&self, keys: &[Key]) {
        self.shared.store.mark_dirty_transitive(
            keys,
            DirtyKind::Affected,
            self.shared.listener.as_ref(),
        );
    }

    /// Remove done nodes matching `predicate` that nothing depends on.
    /// Returns the number of removed nodes.
    pub fn delete_if(&self, predicate: impl Fn(&Key) -> bool) -> usize {
        self.shared.store.delete_if(predicate)
    }

    /// Cancel the evaluation in progress, if any. Workers drain; in-flight
    /// nodes commit nothing.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
        if let Some(scheduler) = self.shared.current.lock().upgrade() {
            scheduler.record_error(EvalError::Cancelled, true);
        }
    }

    /// Run idle-period maintenance (interner shrinking) on a background
    /// thread. The next [`evaluate`](Engine::evaluate) blocks until it
    /// finishes.
    pub fn begin_idle(&self) {
        let mut idle = self.idle.lock();
        if idle.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *idle = Some(std::thread::spawn(move || {
            shared.interner.shrink();
        }));
    }

    fn finish_idle(&self) {
        if let Some(handle) = self.idle.lock().take() {
            let _ = handle.join();
        }
    }

    /// True when `key` has a committed value.
    pub fn is_done(&self, key: &Key) -> bool {
        self.shared.store.get(key).is_some_and(|e| e.is_done())
    }

    /// The lifecycle state of `key`, when a node exists for it.
    pub fn lifecycle(&self, key: &Key) -> Option<Lifecycle> {
        Some(self.shared.store.get(key)?.lifecycle())
    }

    /// The committed (or retained last-build) payload of `key`.
    pub fn committed_value(&self, key: &Key) -> Option<NodeValue> {
        self.shared.store.get(key)?.node_value()
    }

    /// The committed direct deps of `key`.
    pub fn committed_deps(&self, key: &Key) -> Option<Vec<Key>> {
        Some(self.shared.store.get(key)?.committed_dep_keys())
    }

    /// The keys currently declaring `key` as a dep.
    pub fn reverse_deps(&self, key: &Key) -> Option<Vec<Key>> {
        Some(self.shared.store.get(key)?.rdep_keys())
    }

    /// Number of nodes in the store.
    pub fn node_count(&self) -> usize {
        self.shared.store.len()
    }
}

/// Best-effort description of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Everything a worker needs for one evaluation.
struct EvalContext<'a> {
    shared: &'a Arc<EngineShared>,
    scheduler: &'a Arc<Scheduler>,
    version: Version,
    keep_going: bool,
    roots: HashSet<Key, ahash::RandomState>,
}

impl EvalContext<'_> {
    fn worker_loop(&self) {
        loop {
            let key = {
                let mut st = self.scheduler.state.lock();
                loop {
                    if st.closed {
                        return;
                    }
                    if let Some(key) = st.queue.pop_front() {
                        st.in_flight += 1;
                        break key;
                    }
                    if st.in_flight == 0 {
                        self.scheduler.quiet.notify_all();
                    }
                    self.scheduler.work.wait(&mut st);
                }
            };
            self.process(key);
            let mut st = self.scheduler.state.lock();
            st.in_flight -= 1;
            if st.in_flight == 0 && st.queue.is_empty() {
                self.scheduler.quiet.notify_all();
            }
        }
    }

    /// Wait for the evaluation to finish, and resolve stalls: commit cycle
    /// errors (or abort on them), or keep waiting while external deps are
    /// outstanding.
    fn coordinate(&self, cycles: &mut Vec<CycleInfo>) {
        loop {
            let wake = {
                let mut st = self.scheduler.state.lock();
                loop {
                    if st.closed || st.first_error.is_some() {
                        break Wake::Aborted;
                    }
                    if st.pending_roots == 0 {
                        break Wake::Finished;
                    }
                    if st.queue.is_empty() && st.in_flight == 0 {
                        break Wake::Quiescent { ticks: st.ticks };
                    }
                    self.scheduler.quiet.wait(&mut st);
                }
            };
            let seen_ticks = match wake {
                Wake::Finished | Wake::Aborted => return,
                Wake::Quiescent { ticks } => ticks,
            };

            let stalled: Vec<Arc<NodeEntry>> = self
                .shared
                .store
                .entries()
                .into_iter()
                .filter(|e| e.in_flight())
                .collect();
            let found = find_cycles(&stalled);
            {
                // An external signal may have re-scheduled work while the
                // stall was analyzed; in that case the analysis is stale.
                let st = self.scheduler.state.lock();
                if st.ticks != seen_ticks {
                    continue;
                }
            }
            if found.is_empty() {
                if stalled.iter().any(|e| e.has_pending_external()) {
                    // Parked on out-of-band work; wait for its signal.
                    let mut st = self.scheduler.state.lock();
                    while st.ticks == seen_ticks && !st.closed {
                        self.scheduler.quiet.wait(&mut st);
                    }
                    continue;
                }
                assert!(
                    stalled.is_empty(),
                    "evaluation stalled with no ready node, no cycle, and no \
                     external dep: {:?}",
                    stalled.iter().map(|e| e.key().clone()).collect::<Vec<_>>()
                );
                return;
            }

            // Commit every member of every cycle done-with-error before
            // emitting any signal: a signal can wake a worker whose node
            // touches a member of a later cycle, and it must find that
            // member already committed. The graph is quiescent during the
            // commit pass. Member-to-member signals are stale by the time
            // they fire and are ignored.
            let mut commits = Vec::new();
            for path in found {
                self.shared.listener.on_cycle_detected(&path);
                cycles.push(CycleInfo { path: path.clone() });
                let error = EvalError::Cycle {
                    path: path.iter().map(|k| format!("{k:?}")).collect(),
                };
                if !self.keep_going {
                    self.scheduler.record_error(error, true);
                    return;
                }
                for member in &path {
                    let Some(entry) = self.shared.store.get(member) else {
                        continue;
                    };
                    let deps = entry.temporary_snapshot();
                    if let Some(result) =
                        entry.set_value(NodeValue::from_error(error.clone()), self.version, deps)
                    {
                        commits.push((member.clone(), result));
                    }
                }
            }
            for (member, result) in commits {
                self.finish_commit(&member, result, Outcome::Error, &[], None);
            }
        }
    }

    fn process(&self, key: Key) {
        if self.shared.cancelled.load(Ordering::Relaxed) {
            return;
        }
        let Some(entry) = self.shared.store.get(&key) else {
            return;
        };
        loop {
            match entry.lifecycle() {
                Lifecycle::Done | Lifecycle::NotYetEvaluating => return,
                Lifecycle::CheckDependencies => {
                    if !self.check_deps(&key, &entry) {
                        return;
                    }
                }
                Lifecycle::NeedsRebuilding => entry.mark_rebuilding(),
                Lifecycle::Rebuilding => {
                    self.run_evaluator(&key, &entry);
                    return;
                }
            }
        }
    }

    /// Walk previous dep groups in declaration order, requesting each and
    /// waiting for its signals. Returns true when a dep changed and the
    /// caller should proceed to rebuilding; false when the node parked or
    /// committed clean.
    fn check_deps(&self, key: &Key, entry: &Arc<NodeEntry>) -> bool {
        loop {
            if entry.lifecycle() != Lifecycle::CheckDependencies {
                return true;
            }
            match entry.next_dirty_dep_group() {
                Some(group) => {
                    entry.begin_dep_wait(group.len());
                    for dep in &group {
                        self.request_dep(key, entry, dep);
                    }
                    if !entry.park_if_unready() {
                        return false;
                    }
                }
                None => {
                    // Every previous dep verified unchanged: reuse the
                    // previous value without running the evaluator, and do
                    // not re-signal change to rdeps.
                    if let Some(result) = entry.commit_clean(self.version) {
                        self.finish_commit(key, result, Outcome::CleanHit, &[], None);
                    }
                    return false;
                }
            }
        }
    }

    /// Issue one dep request on behalf of `key`. Already-done deps are
    /// self-signaled by the requesting side, closing the race with deps
    /// completing concurrently.
    fn request_dep(&self, key: &Key, entry: &Arc<NodeEntry>, dep: &Key) {
        let dep_entry = self.shared.store.create_if_absent(dep);
        match dep_entry.add_reverse_dep_and_check_if_done(Some(key)) {
            DependencyState::AlreadyDone => {
                let _ = entry.signal_dep(dep_entry.last_changed());
            }
            DependencyState::NeedsScheduling => self.scheduler.push(dep.clone()),
            DependencyState::AlreadyEvaluating => {}
        }
    }

    fn run_evaluator(&self, key: &Key, entry: &Arc<NodeEntry>) {
        let Some(evaluator) = self.shared.registry.get(key.tag().name()) else {
            self.scheduler
                .record_error(EvalError::MissingEvaluator { tag: key.tag().name() }, true);
            return;
        };
        let evaluator = Arc::clone(evaluator);
        let mut env = Environment::new(self.shared, self.scheduler, entry);
        // A panic escaping an evaluator is wrapped as an evaluation error
        // attributable to this node, not a poisoned evaluation: the graph
        // and the other workers keep going.
        let outcome = catch_unwind(AssertUnwindSafe(|| evaluator.compute(key, &mut env)))
            .unwrap_or_else(|payload| {
                Err(EvalError::evaluation(
                    key,
                    format!("evaluator panicked: {}", panic_message(&payload)),
                ))
            });
        let parts = env.into_parts();

        if !parts.newly_declared.is_empty() {
            entry.begin_dep_wait(parts.newly_declared.len());
            entry.add_temporary_direct_deps(&parts.newly_declared);
            for dep in parts.newly_declared.iter() {
                self.request_dep(key, entry, dep);
            }
        }

        match outcome {
            Err(EvalError::Restart) => {
                if !entry.park_if_unready() {
                    return;
                }
                // Ready again already: deps finished while the evaluator
                // ran, or only errored deps remain.
                if let Some(error) = parts.dep_errors.first() {
                    self.commit_evaluated(
                        key,
                        entry,
                        NodeValue::from_error(error.clone()),
                        &parts.run_declared,
                    );
                } else if parts.missing {
                    self.scheduler.push(key.clone());
                } else {
                    panic!(
                        "evaluator for {key:?} restarted with no missing deps and \
                         no external dep"
                    );
                }
            }
            Err(EvalError::Cancelled) => {
                // Global cancel or evaluator-observed cancellation: nothing
                // commits; the coordinator unwinds the evaluation.
                if !self.shared.cancelled.load(Ordering::Relaxed) {
                    self.scheduler.record_error(EvalError::Cancelled, true);
                }
            }
            Err(error) => {
                self.commit_evaluated(
                    key,
                    entry,
                    NodeValue::from_error(error),
                    &parts.run_declared,
                );
            }
            Ok(value) => {
                self.commit_evaluated(
                    key,
                    entry,
                    NodeValue::from_value(value),
                    &parts.run_declared,
                );
            }
        }
    }

    /// Commit the payload of an evaluator run. The node's final deps are
    /// the deps this run declared, minus any that never finished; dropped
    /// and unfinished deps are unlinked from their reverse-dep sets before
    /// the commit is observable through signals.
    fn commit_evaluated(
        &self,
        key: &Key,
        entry: &Arc<NodeEntry>,
        payload: NodeValue,
        run_declared: &GroupedDeps,
    ) {
        let mut final_deps = GroupedDeps::new(key.tag().skips_batch_prefetch());
        for i in 0..run_declared.group_count() {
            let group: Vec<Key> = run_declared
                .group(i)
                .iter()
                .filter(|dep| self.shared.store.get(dep).is_some_and(|e| e.is_done()))
                .cloned()
                .collect();
            final_deps.append_group(group);
        }
        let final_set = final_deps.to_key_set();
        let mut removed: Vec<Key> = Vec::new();
        let mut seen: HashSet<Key, ahash::RandomState> = HashSet::default();
        for dep in entry
            .committed_dep_keys()
            .into_iter()
            .chain(entry.temporary_snapshot().iter().cloned())
        {
            if !final_set.contains(&dep) && seen.insert(dep.clone()) {
                removed.push(dep);
            }
        }

        let error = payload.error().cloned();
        let is_error = error.is_some();
        let Some(result) = entry.set_value(payload, self.version, final_deps) else {
            return;
        };
        let outcome = if is_error {
            Outcome::Error
        } else if result.changed {
            Outcome::Changed
        } else {
            Outcome::Unchanged
        };
        self.finish_commit(key, result, outcome, &removed, error);
    }

    /// Shared commit tail: unlink retracted deps, drop compute state,
    /// notify, account roots and errors, and signal waiting rdeps.
    fn finish_commit(
        &self,
        key: &Key,
        result: crate::node::CommitResult,
        outcome: Outcome,
        removed: &[Key],
        error: Option<EvalError>,
    ) {
        for dep in removed {
            if let Some(dep_entry) = self.shared.store.get(dep) {
                dep_entry.remove_reverse_dep(key);
            }
        }
        if self.shared.states.discard(key) {
            if let Some(evaluator) = self.shared.registry.get(key.tag().name()) {
                evaluator.clean_up_state(key);
            }
        }
        self.shared.listener.on_node_computed(key, outcome);
        if let Some(error) = error {
            if !self.keep_going {
                self.scheduler.record_error(error, true);
            }
        }
        if self.roots.contains(key) {
            self.scheduler.root_done();
        }
        for rdep in result.rdeps {
            if let Some(rdep_entry) = self.shared.store.get(&rdep) {
                if rdep_entry.signal_dep(result.last_changed) {
                    self.scheduler.push(rdep);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Engine>();
        assert_sync::<Engine>();
    }

    #[test]
    fn empty_roots_do_no_work() {
        let engine = Engine::builder().workers(2).build();
        let result = engine.evaluate(&[], false);
        assert!(result.is_empty());
        assert!(!result.has_error());
        assert_eq!(engine.node_count(), 0);
    }
}
