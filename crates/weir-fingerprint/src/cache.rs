//! The bidirectional fingerprint <-> value cache.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use papaya::{Compute, HashMap, Operation};
use parking_lot::{Condvar, Mutex};

use crate::fingerprint::{Distinguisher, Fingerprint, FingerprintKey};

/// Type-erased cached value.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Error reported by the owner of a failed cache operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError {
    message: String,
}

impl CacheError {
    /// Wrap a failure description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fingerprint cache operation failed: {}", self.message)
    }
}

impl std::error::Error for CacheError {}

/// A single-assignment slot that waiters can block on.
struct Promise<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Promise<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, value: T) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.ready.notify_all();
        }
    }

    fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        while slot.is_none() {
            self.ready.wait(&mut slot);
        }
        slot.as_ref().cloned().expect("promise completed")
    }

    fn try_get(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

/// An in-flight deserialization owned by some caller.
#[derive(Clone)]
pub struct PendingGet {
    promise: Arc<Promise<Result<CachedValue, CacheError>>>,
}

impl PendingGet {
    fn new() -> Self {
        Self {
            promise: Arc::new(Promise::new()),
        }
    }

    /// Block until the owning caller completes or fails the fetch.
    pub fn wait(&self) -> Result<CachedValue, CacheError> {
        self.promise.wait()
    }

    /// The result, when already available.
    pub fn try_get(&self) -> Option<Result<CachedValue, CacheError>> {
        self.promise.try_get()
    }
}

/// An in-flight serialization owned by some caller.
#[derive(Clone)]
pub struct PendingPut {
    promise: Arc<Promise<Result<Fingerprint, CacheError>>>,
}

impl PendingPut {
    fn new() -> Self {
        Self {
            promise: Arc::new(Promise::new()),
        }
    }

    /// Block until the owning caller completes or fails the store.
    pub fn wait(&self) -> Result<Fingerprint, CacheError> {
        self.promise.wait()
    }

    /// The result, when already available.
    pub fn try_get(&self) -> Option<Result<Fingerprint, CacheError>> {
        self.promise.try_get()
    }
}

/// Outcome of claiming a deserialization.
pub enum GetClaim {
    /// The caller owns the fetch and must call
    /// [`FingerprintValueCache::complete_get`] or
    /// [`FingerprintValueCache::fail_get`].
    Owned,
    /// Someone else's fetch is in flight; wait on it.
    InFlight(PendingGet),
    /// The value is already live in the cache.
    Done(CachedValue),
}

/// Outcome of claiming a serialization.
pub enum PutClaim {
    /// The caller owns the store and must call
    /// [`FingerprintValueCache::complete_put`] or
    /// [`FingerprintValueCache::fail_put`].
    Owned,
    /// Someone else's store is in flight; wait on it.
    InFlight(PendingPut),
    /// The fingerprint is already known.
    Done(Fingerprint),
}

#[derive(Clone)]
enum GetState {
    InFlight(PendingGet),
    Done(Weak<dyn Any + Send + Sync>),
}

#[derive(Clone)]
enum PutState {
    InFlight(PendingPut),
    Done(Fingerprint),
}

/// Serialization-cache key: the identity of a live value.
///
/// Keyed by reference, not by deep equality; the cache deduplicates
/// serializing the *same* object. The weak handle detects address reuse
/// after the original value dies.
#[derive(Clone)]
struct ValueKey {
    addr: usize,
    live: Weak<dyn Any + Send + Sync>,
}

impl ValueKey {
    fn new(value: &CachedValue) -> Self {
        Self {
            addr: Arc::as_ptr(value) as *const () as usize,
            live: Arc::downgrade(value),
        }
    }

    fn is(&self, value: &CachedValue) -> bool {
        self.live
            .upgrade()
            .is_some_and(|live| Arc::ptr_eq(&live, value))
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.addr);
    }
}

/// A bidirectional, in-memory, weak cache between fingerprints and live
/// values, deduplicating in-flight fetches and stores.
///
/// Both directions follow the same claim protocol: the first caller for a
/// key becomes the owner of the outstanding operation and must complete or
/// fail it; every other caller observes the in-flight operation or the
/// finished result. Completing one direction populates the other, so a
/// value that was just serialized deserializes locally.
///
/// Entries hold values weakly. Dead entries are replaced on access and
/// reclaimed by [`shrink`](FingerprintValueCache::shrink), which the host
/// runs during idle periods.
pub struct FingerprintValueCache {
    deserialization: HashMap<FingerprintKey, GetState, ahash::RandomState>,
    serialization: HashMap<ValueKey, PutState, ahash::RandomState>,
}

impl Default for FingerprintValueCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintValueCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            deserialization: HashMap::with_hasher(ahash::RandomState::new()),
            serialization: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Claim the serialization of `value`, or observe a previous one.
    ///
    /// Contention here is two threads racing to serialize the same object;
    /// the loser reuses the winner's in-flight operation instead of
    /// serializing twice.
    pub fn get_or_claim_put(&self, value: &CachedValue) -> PutClaim {
        let key = ValueKey::new(value);
        let pending = PendingPut::new();
        let pinned = self.serialization.pin();
        loop {
            let result = pinned.compute(key.clone(), |existing| match existing {
                None => Operation::Insert(PutState::InFlight(pending.clone())),
                Some((existing_key, state)) => {
                    if !existing_key.is(value) {
                        // Address reuse: the entry describes a dead value.
                        return Operation::Remove;
                    }
                    Operation::Abort(state.clone())
                }
            });
            match result {
                Compute::Inserted(..) => return PutClaim::Owned,
                Compute::Removed(..) => continue,
                Compute::Aborted(PutState::InFlight(pending)) => {
                    return PutClaim::InFlight(pending)
                }
                Compute::Aborted(PutState::Done(fingerprint)) => {
                    return PutClaim::Done(fingerprint)
                }
                Compute::Updated { .. } => unreachable!("claim never updates in place"),
            }
        }
    }

    /// Claim the deserialization of `fingerprint` (extended by the
    /// optional `distinguisher`), or observe a previous one.
    pub fn get_or_claim_get(
        &self,
        fingerprint: Fingerprint,
        distinguisher: Option<Arc<dyn Distinguisher>>,
    ) -> GetClaim {
        let key = FingerprintKey::new(fingerprint, distinguisher);
        let pending = PendingGet::new();
        let pinned = self.deserialization.pin();
        let result = pinned.compute(key, |existing| match existing {
            None => Operation::Insert(GetState::InFlight(pending.clone())),
            Some((_, GetState::InFlight(pending))) => {
                Operation::Abort(GetClaim::InFlight(pending.clone()))
            }
            Some((_, GetState::Done(weak))) => match weak.upgrade() {
                Some(value) => Operation::Abort(GetClaim::Done(value)),
                // The cached value died; the caller re-fetches.
                None => Operation::Insert(GetState::InFlight(pending.clone())),
            },
        });
        match result {
            Compute::Inserted(..) | Compute::Updated { .. } => GetClaim::Owned,
            Compute::Aborted(claim) => claim,
            Compute::Removed(..) => unreachable!("claim never removes"),
        }
    }

    /// Complete an owned put: record the fingerprint, release waiters, and
    /// populate the reverse mapping so subsequent deserializations are
    /// local.
    pub fn complete_put(
        &self,
        value: &CachedValue,
        distinguisher: Option<Arc<dyn Distinguisher>>,
        fingerprint: Fingerprint,
    ) {
        let pinned = self.serialization.pin();
        let _ = pinned.compute(ValueKey::new(value), |existing| match existing {
            Some((_, PutState::InFlight(pending))) => {
                pending.promise.complete(Ok(fingerprint));
                Operation::Insert(PutState::Done(fingerprint))
            }
            _ => Operation::Abort(()),
        });
        // Populating the reverse map may displace an in-flight fetch for the
        // same key; release its waiters with this value.
        let _ = self.deserialization.pin().compute(
            FingerprintKey::new(fingerprint, distinguisher),
            |existing| {
                if let Some((_, GetState::InFlight(pending))) = existing {
                    pending.promise.complete(Ok(Arc::clone(value)));
                }
                Operation::<GetState, ()>::Insert(GetState::Done(Arc::downgrade(value)))
            },
        );
    }

    /// Fail an owned put: waiters observe the error and the entry is not
    /// populated. The owner reports the error to its caller.
    pub fn fail_put(&self, value: &CachedValue, error: CacheError) {
        let pinned = self.serialization.pin();
        let _ = pinned.compute(ValueKey::new(value), |existing| match existing {
            Some((_, PutState::InFlight(pending))) => {
                pending.promise.complete(Err(error.clone()));
                Operation::Remove
            }
            _ => Operation::Abort(()),
        });
    }

    /// Complete an owned get: release waiters with the value and populate
    /// the reverse mapping.
    pub fn complete_get(
        &self,
        fingerprint: Fingerprint,
        distinguisher: Option<Arc<dyn Distinguisher>>,
        value: CachedValue,
    ) {
        let pinned = self.deserialization.pin();
        let _ = pinned.compute(
            FingerprintKey::new(fingerprint, distinguisher),
            |existing| match existing {
                Some((_, GetState::InFlight(pending))) => {
                    pending.promise.complete(Ok(value.clone()));
                    Operation::Insert(GetState::Done(Arc::downgrade(&value)))
                }
                _ => Operation::Abort(()),
            },
        );
        // The fetched value's identity may already carry an in-flight put;
        // its fingerprint is this one, so release those waiters too.
        let _ = self
            .serialization
            .pin()
            .compute(ValueKey::new(&value), |existing| {
                if let Some((_, PutState::InFlight(pending))) = existing {
                    pending.promise.complete(Ok(fingerprint));
                }
                Operation::<PutState, ()>::Insert(PutState::Done(fingerprint))
            });
    }

    /// Fail an owned get: waiters observe the error and the entry is not
    /// populated.
    pub fn fail_get(
        &self,
        fingerprint: Fingerprint,
        distinguisher: Option<Arc<dyn Distinguisher>>,
        error: CacheError,
    ) {
        let pinned = self.deserialization.pin();
        let _ = pinned.compute(
            FingerprintKey::new(fingerprint, distinguisher),
            |existing| match existing {
                Some((_, GetState::InFlight(pending))) => {
                    pending.promise.complete(Err(error.clone()));
                    Operation::Remove
                }
                _ => Operation::Abort(()),
            },
        );
    }

    /// Drop entries whose values died. Intended for idle periods.
    pub fn shrink(&self) {
        {
            let pinned = self.deserialization.pin();
            let dead: Vec<FingerprintKey> = pinned
                .iter()
                .filter(|(_, state)| {
                    matches!(state, GetState::Done(weak) if weak.strong_count() == 0)
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in dead {
                let _ = pinned.compute(key, |existing| match existing {
                    Some((_, GetState::Done(weak))) if weak.strong_count() == 0 => {
                        Operation::Remove
                    }
                    _ => Operation::Abort(()),
                });
            }
        }
        {
            let pinned = self.serialization.pin();
            let dead: Vec<ValueKey> = pinned
                .iter()
                .filter(|(key, _)| key.live.strong_count() == 0)
                .map(|(key, _)| key.clone())
                .collect();
            for key in dead {
                let _ = pinned.compute(key, |existing| match existing {
                    Some((key, _)) if key.live.strong_count() == 0 => Operation::Remove,
                    _ => Operation::Abort(()),
                });
            }
        }
    }

    /// Number of live entries in the deserialization direction.
    pub fn deserialization_len(&self) -> usize {
        self.deserialization.pin().len()
    }

    /// Number of live entries in the serialization direction.
    pub fn serialization_len(&self) -> usize {
        self.serialization.pin().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(n: u64) -> CachedValue {
        Arc::new(n)
    }

    #[test]
    fn put_then_get_round_trips_locally() {
        let cache = FingerprintValueCache::new();
        let v = value(7);
        let fp = Fingerprint::of(b"seven");

        assert!(matches!(cache.get_or_claim_put(&v), PutClaim::Owned));
        cache.complete_put(&v, None, fp);

        // Serialization direction remembers the fingerprint.
        match cache.get_or_claim_put(&v) {
            PutClaim::Done(found) => assert_eq!(found, fp),
            _ => panic!("expected completed put"),
        }
        // Deserialization direction returns the same live value.
        match cache.get_or_claim_get(fp, None) {
            GetClaim::Done(found) => assert!(Arc::ptr_eq(&found, &v)),
            _ => panic!("expected populated reverse mapping"),
        }
    }

    #[test]
    fn second_claimant_waits_on_the_first() {
        let cache = Arc::new(FingerprintValueCache::new());
        let v = value(7);
        let fp = Fingerprint::of(b"seven");

        assert!(matches!(cache.get_or_claim_put(&v), PutClaim::Owned));
        let pending = match cache.get_or_claim_put(&v) {
            PutClaim::InFlight(pending) => pending,
            _ => panic!("expected in-flight put"),
        };
        let waiter = {
            let pending = pending.clone();
            std::thread::spawn(move || pending.wait())
        };
        cache.complete_put(&v, None, fp);
        assert_eq!(waiter.join().unwrap(), Ok(fp));
    }

    #[test]
    fn failed_put_does_not_populate() {
        let cache = FingerprintValueCache::new();
        let v = value(7);
        assert!(matches!(cache.get_or_claim_put(&v), PutClaim::Owned));
        cache.fail_put(&v, CacheError::new("remote store unavailable"));
        // The next caller owns a fresh attempt.
        assert!(matches!(cache.get_or_claim_put(&v), PutClaim::Owned));
    }

    #[test]
    fn distinguishers_separate_shared_representations() {
        let cache = FingerprintValueCache::new();
        let fp = Fingerprint::of(b"shared-bytes");
        let ctx_a: Option<Arc<dyn Distinguisher>> = Some(Arc::new("parent-a".to_string()));
        let ctx_b: Option<Arc<dyn Distinguisher>> = Some(Arc::new("parent-b".to_string()));

        let (va, vb) = (value(1), value(2));
        assert!(matches!(
            cache.get_or_claim_get(fp, ctx_a.clone()),
            GetClaim::Owned
        ));
        cache.complete_get(fp, ctx_a.clone(), va.clone());
        assert!(matches!(
            cache.get_or_claim_get(fp, ctx_b.clone()),
            GetClaim::Owned
        ));
        cache.complete_get(fp, ctx_b.clone(), vb.clone());

        match cache.get_or_claim_get(fp, ctx_a) {
            GetClaim::Done(found) => assert!(Arc::ptr_eq(&found, &va)),
            _ => panic!("expected ctx-a value"),
        }
        match cache.get_or_claim_get(fp, ctx_b) {
            GetClaim::Done(found) => assert!(Arc::ptr_eq(&found, &vb)),
            _ => panic!("expected ctx-b value"),
        }
    }

    #[test]
    fn dead_values_are_refetched_and_shrunk() {
        let cache = FingerprintValueCache::new();
        let fp = Fingerprint::of(b"ephemeral");
        {
            let v = value(9);
            assert!(matches!(cache.get_or_claim_get(fp, None), GetClaim::Owned));
            cache.complete_get(fp, None, v);
        }
        // Value dropped: the cache must hand ownership back out.
        assert!(matches!(cache.get_or_claim_get(fp, None), GetClaim::Owned));
        cache.fail_get(fp, None, CacheError::new("gone"));
        cache.shrink();
        assert_eq!(cache.deserialization_len(), 0);
        assert_eq!(cache.serialization_len(), 0);
    }

    #[test]
    fn address_reuse_does_not_alias() {
        let cache = FingerprintValueCache::new();
        let fp_old = Fingerprint::of(b"old");
        // Complete a put, then drop the value so its address can be reused.
        {
            let v = value(1);
            assert!(matches!(cache.get_or_claim_put(&v), PutClaim::Owned));
            cache.complete_put(&v, None, fp_old);
        }
        // A fresh value (possibly at the same address) must not observe the
        // dead entry's fingerprint.
        for n in 0..64 {
            let v = value(n);
            match cache.get_or_claim_put(&v) {
                PutClaim::Owned => cache.fail_put(&v, CacheError::new("abandoned")),
                PutClaim::Done(found) => assert_ne!(found, fp_old),
                PutClaim::InFlight(_) => panic!("no concurrent claimants"),
            }
        }
    }
}
