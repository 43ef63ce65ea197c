//! Per-key node entries and their lifecycle state machine.
//!
//! Compound operations here exist to close check-then-act races between
//! workers. Consider two threads finishing nodes `a` and `b` where `b`
//! depends on `a`: if `a` completes second it must signal `b` and possibly
//! re-schedule it, while `b` must park exactly when some requested dep is
//! still unsignaled. All accounting for that runs under the entry lock.

use std::collections::HashSet;

use indexmap::IndexSet;
use parking_lot::Mutex;

use crate::key::Key;
use crate::value::{NodeValue, Version};

/// Result of [`NodeEntry::add_reverse_dep_and_check_if_done`].
///
/// `NeedsScheduling` is returned exactly once per evaluation of the node;
/// the caller receiving it must enqueue the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DependencyState {
    AlreadyDone,
    NeedsScheduling,
    AlreadyEvaluating,
}

/// Externally observable lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created or marked dirty, but not scheduled in the current evaluation.
    NotYetEvaluating,
    /// Walking previous deps to decide whether a rebuild is needed.
    CheckDependencies,
    /// A dep changed; the evaluator must run.
    NeedsRebuilding,
    /// The evaluator is running (or restarting).
    Rebuilding,
    /// Value committed.
    Done,
}

/// Why a node was marked dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirtyKind {
    /// Some transitive input changed; re-evaluation may be pruned.
    Affected,
    /// The node's own inputs changed; re-evaluation is forced.
    Changed,
}

/// Ordered groups of dep keys.
///
/// Within a group, deps may be requested concurrently; group order records
/// "I needed these results before I could ask for the next group". When the
/// key skips batch prefetching a set index is kept alongside for O(1)
/// membership tests.
#[derive(Debug, Clone, Default)]
pub(crate) struct GroupedDeps {
    deps: Vec<Key>,
    group_ends: Vec<u32>,
    index: Option<HashSet<Key, ahash::RandomState>>,
}

impl GroupedDeps {
    pub(crate) fn new(with_index: bool) -> Self {
        Self {
            deps: Vec::new(),
            group_ends: Vec::new(),
            index: with_index.then(HashSet::default),
        }
    }

    pub(crate) fn append_group(&mut self, group: Vec<Key>) {
        if group.is_empty() {
            return;
        }
        if let Some(index) = &mut self.index {
            index.extend(group.iter().cloned());
        }
        self.deps.extend(group);
        self.group_ends.push(self.deps.len() as u32);
    }

    pub(crate) fn append_singleton(&mut self, dep: Key) {
        if let Some(index) = &mut self.index {
            index.insert(dep.clone());
        }
        self.deps.push(dep);
        self.group_ends.push(self.deps.len() as u32);
    }

    pub(crate) fn contains(&self, key: &Key) -> bool {
        match &self.index {
            Some(index) => index.contains(key),
            None => self.deps.contains(key),
        }
    }

    pub(crate) fn group_count(&self) -> usize {
        self.group_ends.len()
    }

    pub(crate) fn group(&self, i: usize) -> &[Key] {
        let start = if i == 0 {
            0
        } else {
            self.group_ends[i - 1] as usize
        };
        &self.deps[start..self.group_ends[i] as usize]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Key> + '_ {
        self.deps.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.deps.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub(crate) fn to_key_set(&self) -> HashSet<Key, ahash::RandomState> {
        self.deps.iter().cloned().collect()
    }
}

/// State tracked while a node is dirty or evaluating.
#[derive(Debug)]
struct DirtyState {
    kind: DirtyKind,
    phase: Lifecycle,
    /// Requested deps that have not signaled completion yet. Incremented by
    /// `begin_dep_wait` *before* the requests go out, so a child completing
    /// immediately can never drive the count negative.
    unsignaled: usize,
    /// Outstanding external (keyless) deps.
    external: usize,
    /// Next previous-build dep group to verify.
    check_cursor: usize,
    /// Deps declared during this evaluation, including verified groups.
    temporary: GroupedDeps,
    /// True while the node sits in the ready queue or on a worker.
    scheduled: bool,
    /// A dep signaled while the node was being processed; relevant only to
    /// partial-reevaluation keys.
    signals_during_run: bool,
}

impl DirtyState {
    /// State for a node evaluating for the first time.
    fn initial(with_index: bool) -> Self {
        Self {
            kind: DirtyKind::Changed,
            phase: Lifecycle::Rebuilding,
            unsignaled: 0,
            external: 0,
            check_cursor: 0,
            temporary: GroupedDeps::new(with_index),
            scheduled: true,
            signals_during_run: false,
        }
    }

    /// State for a done node that was marked dirty; scheduling decides the
    /// first real phase.
    fn dirty(kind: DirtyKind, with_index: bool) -> Self {
        Self {
            kind,
            phase: Lifecycle::NotYetEvaluating,
            unsignaled: 0,
            external: 0,
            check_cursor: 0,
            temporary: GroupedDeps::new(with_index),
            scheduled: false,
            signals_during_run: false,
        }
    }
}

struct NodeState {
    /// Last committed payload. Retained while dirty for change pruning.
    value: Option<NodeValue>,
    /// Version at which the value last changed.
    last_changed: Version,
    /// Version at which the node was last built (committed or verified
    /// clean).
    last_built: Version,
    /// Committed direct deps of the last build.
    deps: GroupedDeps,
    /// Keys currently declaring this node as a dep.
    rdeps: IndexSet<Key, ahash::RandomState>,
    /// Rdeps that requested this node during its in-flight evaluation and
    /// must be signaled on commit.
    rdeps_to_signal: Vec<Key>,
    dirty: Option<Box<DirtyState>>,
}

/// Outcome of a commit: who to signal, and with what change information.
pub(crate) struct CommitResult {
    pub(crate) rdeps: Vec<Key>,
    pub(crate) last_changed: Version,
    pub(crate) changed: bool,
}

/// The engine's record for one key. All operations are atomic with respect
/// to concurrent callers; the lock is never held across calls into other
/// entries.
pub(crate) struct NodeEntry {
    key: Key,
    state: Mutex<NodeState>,
}

impl NodeEntry {
    pub(crate) fn new(key: Key) -> Self {
        Self {
            key,
            state: Mutex::new(NodeState {
                value: None,
                last_changed: Version::ZERO,
                last_built: Version::ZERO,
                deps: GroupedDeps::default(),
                rdeps: IndexSet::default(),
                rdeps_to_signal: Vec::new(),
                dirty: None,
            }),
        }
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    fn with_index(&self) -> bool {
        self.key.tag().skips_batch_prefetch()
    }

    pub(crate) fn is_done(&self) -> bool {
        let st = self.state.lock();
        st.value.is_some() && st.dirty.is_none()
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        let st = self.state.lock();
        match &st.dirty {
            None if st.value.is_some() => Lifecycle::Done,
            None => Lifecycle::NotYetEvaluating,
            Some(d) => d.phase,
        }
    }

    /// The committed payload, or the retained last-build payload of a dirty
    /// node. `None` for a node that never finished a build.
    pub(crate) fn node_value(&self) -> Option<NodeValue> {
        self.state.lock().value.clone()
    }

    pub(crate) fn last_changed(&self) -> Version {
        self.state.lock().last_changed
    }

    pub(crate) fn committed_dep_keys(&self) -> Vec<Key> {
        self.state.lock().deps.iter().cloned().collect()
    }

    pub(crate) fn rdep_keys(&self) -> Vec<Key> {
        self.state.lock().rdeps.iter().cloned().collect()
    }

    pub(crate) fn temporary_snapshot(&self) -> GroupedDeps {
        let st = self.state.lock();
        match &st.dirty {
            Some(d) => d.temporary.clone(),
            None => GroupedDeps::default(),
        }
    }

    pub(crate) fn has_pending_external(&self) -> bool {
        self.state
            .lock()
            .dirty
            .as_ref()
            .is_some_and(|d| d.external > 0)
    }

    /// True when the node participates in the current evaluation.
    pub(crate) fn in_flight(&self) -> bool {
        self.state
            .lock()
            .dirty
            .as_ref()
            .is_some_and(|d| d.phase != Lifecycle::NotYetEvaluating)
    }

    /// Register `rdep` (when present) and report how the caller should
    /// proceed: use the value (`AlreadyDone`), enqueue this node
    /// (`NeedsScheduling`, returned once per evaluation), or wait for its
    /// signal (`AlreadyEvaluating`).
    pub(crate) fn add_reverse_dep_and_check_if_done(
        &self,
        rdep: Option<&Key>,
    ) -> DependencyState {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let done = st.value.is_some() && st.dirty.is_none();
        if let Some(rdep) = rdep {
            st.rdeps.insert(rdep.clone());
            if !done {
                debug_assert!(
                    !st.rdeps_to_signal.contains(rdep),
                    "{rdep:?} requested {:?} twice in one evaluation",
                    self.key
                );
                st.rdeps_to_signal.push(rdep.clone());
            }
        }
        if done {
            return DependencyState::AlreadyDone;
        }
        let with_index = self.with_index();
        match &mut st.dirty {
            None => {
                st.dirty = Some(Box::new(DirtyState::initial(with_index)));
                DependencyState::NeedsScheduling
            }
            Some(d) if d.phase == Lifecycle::NotYetEvaluating => {
                d.phase = match d.kind {
                    DirtyKind::Changed => Lifecycle::NeedsRebuilding,
                    DirtyKind::Affected => Lifecycle::CheckDependencies,
                };
                d.scheduled = true;
                DependencyState::NeedsScheduling
            }
            Some(_) => DependencyState::AlreadyEvaluating,
        }
    }

    pub(crate) fn remove_reverse_dep(&self, rdep: &Key) {
        let mut st = self.state.lock();
        st.rdeps.swap_remove(rdep);
        st.rdeps_to_signal.retain(|k| k != rdep);
    }

    /// Pre-register `n` outstanding dep signals. Must be called before the
    /// corresponding requests are issued. No-op when the node was committed
    /// out from under the caller (cycle resolution).
    pub(crate) fn begin_dep_wait(&self, n: usize) {
        let mut st = self.state.lock();
        if let Some(d) = st.dirty.as_mut() {
            d.unsignaled += n;
        }
    }

    /// A requested dep completed; `dep_last_changed` is the version at which
    /// its value last changed. Returns true when the caller must enqueue
    /// this node.
    pub(crate) fn signal_dep(&self, dep_last_changed: Version) -> bool {
        let mut st = self.state.lock();
        let last_built = st.last_built;
        let Some(d) = st.dirty.as_mut() else {
            // The node committed without waiting for this dep
            // (removeUnfinishedDeps path); the signal is stale.
            return false;
        };
        debug_assert!(d.unsignaled > 0, "unexpected signal for {:?}", self.key);
        d.unsignaled = d.unsignaled.saturating_sub(1);
        if d.phase == Lifecycle::CheckDependencies && dep_last_changed > last_built {
            d.phase = Lifecycle::NeedsRebuilding;
        }
        self.check_ready(d)
    }

    /// An external (keyless) dep was registered.
    pub(crate) fn add_external_dep(&self) {
        let mut st = self.state.lock();
        if let Some(d) = st.dirty.as_mut() {
            d.external += 1;
        }
    }

    /// An external dep completed. Returns true when the caller must enqueue
    /// this node.
    pub(crate) fn signal_external_dep(&self) -> bool {
        let mut st = self.state.lock();
        let Some(d) = st.dirty.as_mut() else {
            return false;
        };
        d.external = d.external.saturating_sub(1);
        self.check_ready(d)
    }

    fn check_ready(&self, d: &mut DirtyState) -> bool {
        if d.scheduled {
            d.signals_during_run = true;
            return false;
        }
        // Partial reevaluation re-enters the evaluator with deps in flight;
        // the dirty-check walk stays strictly signal-ordered.
        let ready = (d.unsignaled == 0 && d.external == 0)
            || (d.phase == Lifecycle::Rebuilding
                && self.key.tag().supports_partial_reevaluation());
        if ready {
            d.scheduled = true;
        }
        ready
    }

    /// Called by the processing worker when it is about to stop working on
    /// the node. Returns true when the node is (still or again) ready and
    /// the worker should keep going or re-enqueue it; otherwise the node is
    /// parked until the next signal.
    pub(crate) fn park_if_unready(&self) -> bool {
        let mut st = self.state.lock();
        let Some(d) = st.dirty.as_mut() else {
            return false;
        };
        if d.unsignaled == 0 && d.external == 0 {
            d.signals_during_run = false;
            return true;
        }
        if d.phase == Lifecycle::Rebuilding
            && self.key.tag().supports_partial_reevaluation()
            && d.signals_during_run
        {
            d.signals_during_run = false;
            return true;
        }
        d.scheduled = false;
        d.signals_during_run = false;
        false
    }

    /// Next previous-build dep group to verify, or `None` when every group
    /// checked out unchanged. The returned group is recorded as declared.
    pub(crate) fn next_dirty_dep_group(&self) -> Option<Vec<Key>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let cursor = {
            let d = st.dirty.as_ref()?;
            debug_assert_eq!(d.phase, Lifecycle::CheckDependencies, "{:?}", self.key);
            d.check_cursor
        };
        if cursor >= st.deps.group_count() {
            return None;
        }
        let group: Vec<Key> = st.deps.group(cursor).to_vec();
        let d = st.dirty.as_mut().unwrap();
        d.check_cursor += 1;
        d.temporary.append_group(group.clone());
        Some(group)
    }

    /// Record deps declared by the evaluator. Groups already present in the
    /// temporary deps must have been filtered out by the environment.
    pub(crate) fn add_temporary_direct_deps(&self, groups: &GroupedDeps) {
        let mut st = self.state.lock();
        if let Some(d) = st.dirty.as_mut() {
            for i in 0..groups.group_count() {
                d.temporary.append_group(groups.group(i).to_vec());
            }
        }
    }

    pub(crate) fn mark_rebuilding(&self) {
        let mut st = self.state.lock();
        if let Some(d) = st.dirty.as_mut() {
            if d.phase == Lifecycle::NeedsRebuilding {
                d.phase = Lifecycle::Rebuilding;
            }
        }
    }

    /// Transition Done -> Dirty. Returns the rdeps to mark affected when
    /// this call performed the transition; `None` when the node was already
    /// dirty (possibly upgrading Affected to Changed) or never built.
    pub(crate) fn mark_dirty(&self, kind: DirtyKind) -> Option<Vec<Key>> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let with_index = self.with_index();
        match &mut st.dirty {
            None if st.value.is_some() => {
                st.dirty = Some(Box::new(DirtyState::dirty(kind, with_index)));
                Some(st.rdeps.iter().cloned().collect())
            }
            None => None,
            Some(d) => {
                if kind == DirtyKind::Changed && d.kind == DirtyKind::Affected {
                    d.kind = DirtyKind::Changed;
                    if d.phase == Lifecycle::CheckDependencies {
                        d.phase = Lifecycle::NeedsRebuilding;
                    }
                }
                None
            }
        }
    }

    /// Commit a freshly computed payload, installing `new_deps` as the
    /// node's direct deps. Change-ness is decided against the retained
    /// previous payload. Returns `None` when the node was already committed
    /// by concurrent cycle resolution.
    pub(crate) fn set_value(
        &self,
        value: NodeValue,
        at: Version,
        new_deps: GroupedDeps,
    ) -> Option<CommitResult> {
        let mut st = self.state.lock();
        st.dirty.take()?;
        let changed = match &st.value {
            Some(previous) => !value.prunes_against(previous),
            None => true,
        };
        if changed {
            st.last_changed = at;
        }
        st.last_built = at;
        st.value = Some(value);
        st.deps = new_deps;
        Some(CommitResult {
            rdeps: std::mem::take(&mut st.rdeps_to_signal),
            last_changed: st.last_changed,
            changed,
        })
    }

    /// Commit a dirty node whose deps all verified unchanged: the previous
    /// value is re-committed and `last_changed` keeps its old version, so
    /// rdeps observe no change. Returns `None` when the node was already
    /// committed by concurrent cycle resolution.
    pub(crate) fn commit_clean(&self, at: Version) -> Option<CommitResult> {
        let mut st = self.state.lock();
        let d = st.dirty.take()?;
        debug_assert_eq!(d.phase, Lifecycle::CheckDependencies, "{:?}", self.key);
        debug_assert!(st.value.is_some(), "clean commit without a previous value");
        st.last_built = at;
        Some(CommitResult {
            rdeps: std::mem::take(&mut st.rdeps_to_signal),
            last_changed: st.last_changed,
            changed: false,
        })
    }

    /// Abandon an in-flight evaluation (cancellation, fail-fast abort). A
    /// previously built node returns to the not-yet-evaluating dirty state;
    /// a node on its initial build returns to just-created.
    pub(crate) fn reset_in_flight(&self) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let kind = match &st.dirty {
            Some(d) if d.phase != Lifecycle::NotYetEvaluating => d.kind,
            _ => return,
        };
        st.rdeps_to_signal.clear();
        let with_index = self.with_index();
        if st.value.is_some() {
            st.dirty = Some(Box::new(DirtyState::dirty(kind, with_index)));
        } else {
            st.dirty = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FunctionTag;
    use std::sync::Arc;

    const TAG: FunctionTag = FunctionTag::new("node-test");

    fn key(n: u32) -> Key {
        Key::from_parts(TAG, Box::new(n))
    }

    fn payload(n: i64) -> NodeValue {
        NodeValue::from_value(Arc::new(n))
    }

    #[test]
    fn needs_scheduling_returned_exactly_once() {
        let entry = NodeEntry::new(key(1));
        let parent = key(2);
        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(None),
            DependencyState::NeedsScheduling
        );
        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(Some(&parent)),
            DependencyState::AlreadyEvaluating
        );
    }

    #[test]
    fn commit_transitions_to_done_and_signals() {
        let entry = NodeEntry::new(key(1));
        let parent = key(2);
        entry.add_reverse_dep_and_check_if_done(None);
        entry.add_reverse_dep_and_check_if_done(Some(&parent));
        let result = entry.set_value(payload(5), Version(1), GroupedDeps::default()).unwrap();
        assert!(result.changed);
        assert_eq!(result.rdeps, vec![parent]);
        assert!(entry.is_done());
        assert_eq!(entry.lifecycle(), Lifecycle::Done);
    }

    #[test]
    fn dirty_affected_checks_deps_before_rebuilding() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        let mut deps = GroupedDeps::default();
        deps.append_singleton(key(10));
        entry.set_value(payload(5), Version(1), deps).unwrap();

        let rdeps = entry.mark_dirty(DirtyKind::Affected);
        assert_eq!(rdeps, Some(vec![]));
        assert!(!entry.is_done());
        assert_eq!(entry.lifecycle(), Lifecycle::NotYetEvaluating);

        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(None),
            DependencyState::NeedsScheduling
        );
        assert_eq!(entry.lifecycle(), Lifecycle::CheckDependencies);
        let group = entry.next_dirty_dep_group().unwrap();
        assert_eq!(group, vec![key(10)]);
        assert!(entry.next_dirty_dep_group().is_none());
    }

    #[test]
    fn changed_dirty_skips_dep_checking() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.set_value(payload(5), Version(1), GroupedDeps::default()).unwrap();
        entry.mark_dirty(DirtyKind::Changed);
        entry.add_reverse_dep_and_check_if_done(None);
        assert_eq!(entry.lifecycle(), Lifecycle::NeedsRebuilding);
    }

    #[test]
    fn affected_upgrades_to_changed() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.set_value(payload(5), Version(1), GroupedDeps::default()).unwrap();
        assert!(entry.mark_dirty(DirtyKind::Affected).is_some());
        assert!(entry.mark_dirty(DirtyKind::Changed).is_none());
        entry.add_reverse_dep_and_check_if_done(None);
        assert_eq!(entry.lifecycle(), Lifecycle::NeedsRebuilding);
    }

    #[test]
    fn signal_accounting_reaches_ready_once() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.begin_dep_wait(2);
        // The node is "scheduled" (on a worker); signals must not re-enqueue.
        assert!(!entry.signal_dep(Version(1)));
        assert!(!entry.signal_dep(Version(1)));
        // The worker parks only if signals are outstanding.
        assert!(entry.park_if_unready());
    }

    #[test]
    fn park_then_last_signal_enqueues() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.begin_dep_wait(2);
        assert!(!entry.signal_dep(Version(1)));
        assert!(!entry.park_if_unready());
        assert!(entry.signal_dep(Version(1)));
    }

    #[test]
    fn unchanged_dep_signal_keeps_check_phase() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        let mut deps = GroupedDeps::default();
        deps.append_singleton(key(10));
        entry.set_value(payload(5), Version(3), deps).unwrap();
        entry.mark_dirty(DirtyKind::Affected);
        entry.add_reverse_dep_and_check_if_done(None);
        entry.next_dirty_dep_group();
        entry.begin_dep_wait(1);
        // Dep last changed at version 2 <= built at 3: unchanged.
        entry.signal_dep(Version(2));
        assert_eq!(entry.lifecycle(), Lifecycle::CheckDependencies);
        // Dep changed after our build: rebuild.
        entry.begin_dep_wait(1);
        entry.signal_dep(Version(4));
        assert_eq!(entry.lifecycle(), Lifecycle::NeedsRebuilding);
    }

    #[test]
    fn clean_commit_preserves_last_changed() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.set_value(payload(5), Version(1), GroupedDeps::default()).unwrap();
        entry.mark_dirty(DirtyKind::Affected);
        entry.add_reverse_dep_and_check_if_done(None);
        assert!(entry.next_dirty_dep_group().is_none());
        let result = entry.commit_clean(Version(2)).unwrap();
        assert!(!result.changed);
        assert_eq!(result.last_changed, Version(1));
        assert!(entry.is_done());
    }

    #[test]
    fn change_pruning_at_commit() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.set_value(payload(5), Version(1), GroupedDeps::default()).unwrap();
        entry.mark_dirty(DirtyKind::Changed);
        entry.add_reverse_dep_and_check_if_done(None);
        let result = entry.set_value(payload(5), Version(2), GroupedDeps::default()).unwrap();
        assert!(!result.changed);
        assert_eq!(result.last_changed, Version(1));
    }

    #[test]
    fn reset_in_flight_allows_rescheduling() {
        let entry = NodeEntry::new(key(1));
        entry.add_reverse_dep_and_check_if_done(None);
        entry.begin_dep_wait(1);
        entry.reset_in_flight();
        assert_eq!(entry.lifecycle(), Lifecycle::NotYetEvaluating);
        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(None),
            DependencyState::NeedsScheduling
        );
    }

    #[test]
    fn grouped_deps_preserve_group_order() {
        let mut deps = GroupedDeps::new(false);
        deps.append_group(vec![key(1), key(2)]);
        deps.append_singleton(key(3));
        assert_eq!(deps.group_count(), 2);
        assert_eq!(deps.group(0), &[key(1), key(2)]);
        assert_eq!(deps.group(1), &[key(3)]);
        assert!(deps.contains(&key(2)));
        assert!(!deps.contains(&key(4)));
    }
}
