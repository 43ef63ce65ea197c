//! Cycle detection over the in-flight dependency graph.
//!
//! Runs when the ready queue drains while nodes remain evaluating: every
//! such stall is either a cycle or a pending external dep. The search is an
//! iterative Tarjan SCC pass restricted to non-done nodes; recursion is
//! replaced by an explicit stack so deep graphs cannot overflow.

use std::collections::HashMap;
use std::sync::Arc;

use crate::key::Key;
use crate::node::NodeEntry;

/// Strongly connected components of size >= 2, plus single nodes with a
/// self-edge, among `entries`. Each returned component is one cycle,
/// attributed to every member.
pub(crate) fn find_cycles(entries: &[Arc<NodeEntry>]) -> Vec<Vec<Key>> {
    let ids: HashMap<Key, usize, ahash::RandomState> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.key().clone(), i))
        .collect();

    // Edges: deps declared by the in-flight evaluation that are themselves
    // in flight. Done deps cannot be part of a stall.
    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(entries.len());
    let mut self_edge = vec![false; entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        let mut out = Vec::new();
        for dep in entry.temporary_snapshot().iter() {
            if let Some(&j) = ids.get(dep) {
                if j == i {
                    self_edge[i] = true;
                }
                out.push(j);
            }
        }
        edges.push(out);
    }

    Tarjan::new(entries.len(), &edges).run(|component| {
        component.len() > 1 || self_edge[component[0]]
    })
    .into_iter()
    .map(|component| {
        component
            .into_iter()
            .map(|i| entries[i].key().clone())
            .collect()
    })
    .collect()
}

struct Tarjan<'a> {
    edges: &'a [Vec<usize>],
    index: Vec<Option<u32>>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: u32,
}

enum Frame {
    Visit(usize),
    Resume { node: usize, edge: usize },
}

impl<'a> Tarjan<'a> {
    fn new(n: usize, edges: &'a [Vec<usize>]) -> Self {
        Self {
            edges,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
        }
    }

    fn run(mut self, keep: impl Fn(&[usize]) -> bool) -> Vec<Vec<usize>> {
        let mut components = Vec::new();
        for start in 0..self.index.len() {
            if self.index[start].is_some() {
                continue;
            }
            let mut work = vec![Frame::Visit(start)];
            while let Some(frame) = work.pop() {
                match frame {
                    Frame::Visit(node) => {
                        if self.index[node].is_some() {
                            continue;
                        }
                        self.index[node] = Some(self.next_index);
                        self.lowlink[node] = self.next_index;
                        self.next_index += 1;
                        self.stack.push(node);
                        self.on_stack[node] = true;
                        work.push(Frame::Resume { node, edge: 0 });
                    }
                    Frame::Resume { node, edge } => {
                        let mut edge = edge;
                        let mut descended = false;
                        while edge < self.edges[node].len() {
                            let succ = self.edges[node][edge];
                            edge += 1;
                            match self.index[succ] {
                                None => {
                                    work.push(Frame::Resume { node, edge });
                                    work.push(Frame::Visit(succ));
                                    descended = true;
                                    break;
                                }
                                Some(succ_index) => {
                                    if self.on_stack[succ] {
                                        self.lowlink[node] =
                                            self.lowlink[node].min(succ_index);
                                    }
                                }
                            }
                        }
                        if descended {
                            continue;
                        }
                        // All successors handled: pop a component if this is
                        // a root, then fold our lowlink into the parent.
                        if Some(self.lowlink[node]) == self.index[node] {
                            let mut component = Vec::new();
                            while let Some(member) = self.stack.pop() {
                                self.on_stack[member] = false;
                                component.push(member);
                                if member == node {
                                    break;
                                }
                            }
                            component.reverse();
                            if keep(&component) {
                                components.push(component);
                            }
                        }
                        if let Some(Frame::Resume { node: parent, .. }) = work.last() {
                            let parent = *parent;
                            self.lowlink[parent] =
                                self.lowlink[parent].min(self.lowlink[node]);
                        }
                    }
                }
            }
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FunctionTag;
    use crate::node::GroupedDeps;

    const TAG: FunctionTag = FunctionTag::new("cycle-test");

    fn key(n: u32) -> Key {
        Key::from_parts(TAG, Box::new(n))
    }

    /// Build in-flight entries with the given dep edges.
    fn graph(edges: &[(u32, &[u32])]) -> Vec<Arc<NodeEntry>> {
        edges
            .iter()
            .map(|(from, deps)| {
                let entry = Arc::new(NodeEntry::new(key(*from)));
                entry.add_reverse_dep_and_check_if_done(None);
                let mut groups = GroupedDeps::default();
                groups.append_group(deps.iter().map(|d| key(*d)).collect());
                entry.add_temporary_direct_deps(&groups);
                entry
            })
            .collect()
    }

    fn cycle_sets(cycles: Vec<Vec<Key>>) -> Vec<Vec<Key>> {
        let mut cycles: Vec<Vec<Key>> = cycles
            .into_iter()
            .map(|mut c| {
                c.sort_by_key(|k| *k.arg::<u32>().unwrap());
                c
            })
            .collect();
        cycles.sort_by_key(|c| *c[0].arg::<u32>().unwrap());
        cycles
    }

    #[test]
    fn chain_has_no_cycle() {
        let entries = graph(&[(1, &[2]), (2, &[3]), (3, &[])]);
        assert!(find_cycles(&entries).is_empty());
    }

    #[test]
    fn triangle_is_one_cycle() {
        let entries = graph(&[(1, &[2]), (2, &[3]), (3, &[1])]);
        let cycles = cycle_sets(find_cycles(&entries));
        assert_eq!(cycles, vec![vec![key(1), key(2), key(3)]]);
    }

    #[test]
    fn self_edge_is_a_length_one_cycle() {
        let entries = graph(&[(1, &[1])]);
        let cycles = find_cycles(&entries);
        assert_eq!(cycles, vec![vec![key(1)]]);
    }

    #[test]
    fn two_disjoint_cycles_are_reported_separately() {
        let entries = graph(&[(1, &[2]), (2, &[1]), (3, &[4]), (4, &[3]), (5, &[1, 3])]);
        let cycles = cycle_sets(find_cycles(&entries));
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0], vec![key(1), key(2)]);
        assert_eq!(cycles[1], vec![key(3), key(4)]);
    }

    #[test]
    fn diamond_is_acyclic() {
        let entries = graph(&[(1, &[2, 3]), (2, &[4]), (3, &[4]), (4, &[])]);
        assert!(find_cycles(&entries).is_empty());
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let n = 50_000u32;
        let mut spec: Vec<(u32, Vec<u32>)> = (0..n).map(|i| (i, vec![i + 1])).collect();
        spec.push((n, vec![0]));
        let edges: Vec<(u32, &[u32])> =
            spec.iter().map(|(k, d)| (*k, d.as_slice())).collect();
        let entries = graph(&edges);
        let cycles = find_cycles(&entries);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), n as usize + 1);
    }
}
