//! Weak key interner.

use std::sync::{Arc, Weak};

use papaya::{Compute, HashMap, Operation};

use crate::key::{Argument, FunctionTag, Key, KeyInner};

/// Canonicalizes value-equal keys to a single allocation.
///
/// The interner holds only [`Weak`] references, bucketed by the key's
/// precomputed hash: a key kept alive by the node store (or by a caller) is
/// found and reused; a key with no strong references left is reclaimed by
/// [`Interner::shrink`], which the engine runs during idle periods.
pub struct Interner {
    buckets: HashMap<u64, Vec<Weak<KeyInner>>, ahash::RandomState>,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self {
            buckets: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Return the canonical key for `(tag, arg)`, creating it if absent.
    ///
    /// Two value-equal inputs always produce reference-equal keys.
    pub fn intern<A: Argument>(&self, tag: FunctionTag, arg: A) -> Key {
        let hash = Key::compute_hash(tag, &arg);
        let pinned = self.buckets.pin();

        // Fast path: the key is already interned and alive.
        if let Some(bucket) = pinned.get(&hash) {
            if let Some(existing) = find_live(bucket, tag, &arg) {
                return existing;
            }
        }

        let candidate = Key::from_parts(tag, Box::new(arg));
        let result = pinned.compute(hash, |entry| match entry {
            None => Operation::Insert(vec![Arc::downgrade(&candidate.0)]),
            Some((_, bucket)) => {
                if let Some(existing) = find_live(bucket, tag, candidate.arg_dyn()) {
                    return Operation::Abort(existing);
                }
                let mut bucket: Vec<_> = bucket
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .cloned()
                    .collect();
                bucket.push(Arc::downgrade(&candidate.0));
                Operation::Insert(bucket)
            }
        });
        match result {
            Compute::Aborted(existing) => existing,
            _ => candidate,
        }
    }

    /// Drop dead entries and empty buckets.
    ///
    /// Intended for idle periods between evaluations; interning remains
    /// correct without ever calling this.
    pub fn shrink(&self) {
        let pinned = self.buckets.pin();
        let hashes: Vec<u64> = pinned.keys().copied().collect();
        for hash in hashes {
            let _ = pinned.compute(hash, |entry| match entry {
                None => Operation::Abort(()),
                Some((_, bucket)) => {
                    let live: Vec<_> = bucket
                        .iter()
                        .filter(|weak| weak.strong_count() > 0)
                        .cloned()
                        .collect();
                    if live.is_empty() {
                        Operation::Remove
                    } else if live.len() == bucket.len() {
                        Operation::Abort(())
                    } else {
                        Operation::Insert(live)
                    }
                }
            });
        }
    }

    /// Number of live interned keys.
    pub fn len(&self) -> usize {
        let pinned = self.buckets.pin();
        pinned
            .iter()
            .map(|(_, bucket)| bucket.iter().filter(|w| w.strong_count() > 0).count())
            .sum()
    }

    /// True when no live key is interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn find_live(bucket: &[Weak<KeyInner>], tag: FunctionTag, arg: &dyn Argument) -> Option<Key> {
    for weak in bucket {
        if let Some(inner) = weak.upgrade() {
            let key = Key(inner);
            if key.tag() == tag && key.arg_dyn().dyn_eq(arg) {
                return Some(key);
            }
        }
    }
    None
}
