//! Concurrent key -> node entry table.

use std::collections::VecDeque;
use std::sync::Arc;

use papaya::{Compute, HashMap, Operation};

use crate::events::Listener;
use crate::key::Key;
use crate::node::{DirtyKind, NodeEntry};

/// Thread-safe table owning all node entries. Per-entry state is protected
/// inside [`NodeEntry`]; the store itself only handles membership.
pub(crate) struct NodeStore {
    nodes: HashMap<Key, Arc<NodeEntry>, ahash::RandomState>,
}

impl NodeStore {
    pub(crate) fn new() -> Self {
        Self {
            nodes: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Atomic get-or-create; returns the canonical entry for `key`.
    pub(crate) fn create_if_absent(&self, key: &Key) -> Arc<NodeEntry> {
        let pinned = self.nodes.pin();
        if let Some(entry) = pinned.get(key) {
            return Arc::clone(entry);
        }
        let result = pinned.compute(key.clone(), |existing| match existing {
            Some((_, entry)) => Operation::Abort(Arc::clone(entry)),
            None => Operation::Insert(Arc::new(NodeEntry::new(key.clone()))),
        });
        match result {
            Compute::Inserted(_, entry) => Arc::clone(entry),
            Compute::Aborted(entry) => entry,
            _ => unreachable!("create_if_absent neither inserted nor aborted"),
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Arc<NodeEntry>> {
        self.nodes.pin().get(key).map(Arc::clone)
    }

    /// Mark `keys` dirty with `kind` and transitively mark their reverse
    /// deps affected. Iterative walk; each node is visited at most once per
    /// Done -> Dirty transition, which bounds the work.
    pub(crate) fn mark_dirty_transitive(
        &self,
        keys: &[Key],
        kind: DirtyKind,
        listener: &dyn Listener,
    ) {
        let mut queue: VecDeque<(Key, DirtyKind)> =
            keys.iter().map(|k| (k.clone(), kind)).collect();
        while let Some((key, kind)) = queue.pop_front() {
            let Some(entry) = self.get(&key) else {
                continue;
            };
            if let Some(rdeps) = entry.mark_dirty(kind) {
                listener.on_node_invalidated(&key, kind == DirtyKind::Changed);
                for rdep in rdeps {
                    queue.push_back((rdep, DirtyKind::Affected));
                }
            }
        }
    }

    /// Remove done entries matching `predicate` that no other node depends
    /// on, unlinking them from their deps' reverse-dep sets. Returns the
    /// number of removed entries.
    pub(crate) fn delete_if(&self, predicate: impl Fn(&Key) -> bool) -> usize {
        let candidates: Vec<Key> = {
            let pinned = self.nodes.pin();
            pinned
                .iter()
                .filter(|(key, entry)| {
                    predicate(key) && entry.is_done() && entry.rdep_keys().is_empty()
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        let mut removed = 0;
        for key in candidates {
            let pinned = self.nodes.pin();
            let result = pinned.compute(key.clone(), |existing| match existing {
                Some((_, entry)) if entry.is_done() && entry.rdep_keys().is_empty() => {
                    Operation::Remove
                }
                _ => Operation::Abort(()),
            });
            if let Compute::Removed(_, entry) = result {
                removed += 1;
                for dep in entry.committed_dep_keys() {
                    if let Some(dep_entry) = self.get(&dep) {
                        dep_entry.remove_reverse_dep(&key);
                    }
                }
            }
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.pin().len()
    }

    /// Snapshot of every entry; used for quiescence analysis and abort
    /// cleanup.
    pub(crate) fn entries(&self) -> Vec<Arc<NodeEntry>> {
        self.nodes
            .pin()
            .iter()
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopListener;
    use crate::key::FunctionTag;
    use crate::node::GroupedDeps;
    use crate::value::{NodeValue, Version};

    const TAG: FunctionTag = FunctionTag::new("store-test");

    fn key(n: u32) -> Key {
        Key::from_parts(TAG, Box::new(n))
    }

    fn commit(entry: &NodeEntry, deps: GroupedDeps) {
        entry.add_reverse_dep_and_check_if_done(None);
        entry.set_value(NodeValue::from_value(Arc::new(0i64)), Version(1), deps)
            .unwrap();
    }

    #[test]
    fn create_if_absent_is_canonical() {
        let store = NodeStore::new();
        let a = store.create_if_absent(&key(1));
        let b = store.create_if_absent(&key(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn transitive_marking_walks_rdeps() {
        let store = NodeStore::new();
        // c <- b <- a
        let (ka, kb, kc) = (key(1), key(2), key(3));
        let (a, b, c) = (
            store.create_if_absent(&ka),
            store.create_if_absent(&kb),
            store.create_if_absent(&kc),
        );
        let mut b_deps = GroupedDeps::default();
        b_deps.append_singleton(kc.clone());
        let mut a_deps = GroupedDeps::default();
        a_deps.append_singleton(kb.clone());
        commit(&c, GroupedDeps::default());
        c.add_reverse_dep_and_check_if_done(Some(&kb));
        commit(&b, b_deps);
        b.add_reverse_dep_and_check_if_done(Some(&ka));
        commit(&a, a_deps);

        store.mark_dirty_transitive(std::slice::from_ref(&kc), DirtyKind::Changed, &NoopListener);
        assert!(!a.is_done());
        assert!(!b.is_done());
        assert!(!c.is_done());
    }

    #[test]
    fn delete_if_skips_referenced_entries() {
        let store = NodeStore::new();
        let (ka, kb) = (key(1), key(2));
        let a = store.create_if_absent(&ka);
        let b = store.create_if_absent(&kb);
        let mut a_deps = GroupedDeps::default();
        a_deps.append_singleton(kb.clone());
        commit(&b, GroupedDeps::default());
        b.add_reverse_dep_and_check_if_done(Some(&ka));
        commit(&a, a_deps);

        // b is referenced by a; only a is deletable.
        assert_eq!(store.delete_if(|_| true), 1);
        assert!(store.get(&ka).is_none());
        // With a gone and unlinked, b became deletable.
        assert_eq!(store.delete_if(|_| true), 1);
        assert_eq!(store.len(), 0);
    }
}
