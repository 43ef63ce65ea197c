//! Concurrent claim deduplication: many threads racing to serialize the
//! same value produce exactly one owned operation and one fingerprint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use weir_fingerprint::{
    CachedValue, Fingerprint, FingerprintValueCache, GetClaim, PutClaim,
};

#[test]
fn racing_puts_share_one_operation() {
    let cache = Arc::new(FingerprintValueCache::new());
    let value: CachedValue = Arc::new("expensive artifact graph".to_string());
    let serialized = b"expensive artifact graph";
    let owners = Arc::new(AtomicUsize::new(0));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let fingerprints: Vec<Fingerprint> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let value = Arc::clone(&value);
                let owners = Arc::clone(&owners);
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    match cache.get_or_claim_put(&value) {
                        PutClaim::Owned => {
                            owners.fetch_add(1, Ordering::SeqCst);
                            let fingerprint = Fingerprint::of(serialized);
                            cache.complete_put(&value, None, fingerprint);
                            fingerprint
                        }
                        PutClaim::InFlight(pending) => pending.wait().unwrap(),
                        PutClaim::Done(fingerprint) => fingerprint,
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(owners.load(Ordering::SeqCst), 1);
    for pair in fingerprints.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }

    // Deserialization of that fingerprint is local: the same live value
    // comes back without any fetch.
    match cache.get_or_claim_get(fingerprints[0], None) {
        GetClaim::Done(found) => assert!(Arc::ptr_eq(&found, &value)),
        _ => panic!("expected local reverse mapping"),
    }
}
