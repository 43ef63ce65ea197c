//! In-memory fingerprint <-> value cache with in-flight deduplication.
//!
//! Values whose construction is expensive (deserialized artifact graphs,
//! configuration snapshots) are repeatedly requested by fingerprint. This
//! crate deduplicates both directions: the *write* path (serialize + store)
//! through [`FingerprintValueCache::get_or_claim_put`], and the *read* path
//! (fetch + deserialize) through
//! [`FingerprintValueCache::get_or_claim_get`]. The first caller for a key
//! owns the operation; everyone else reuses its in-flight result.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use weir_fingerprint::{
//!     CachedValue, Fingerprint, FingerprintValueCache, PutClaim,
//! };
//!
//! let cache = FingerprintValueCache::new();
//! let value: CachedValue = Arc::new(vec![1u8, 2, 3]);
//!
//! match cache.get_or_claim_put(&value) {
//!     PutClaim::Owned => {
//!         // Serialize + store; here the "serialized form" is the bytes.
//!         let fingerprint = Fingerprint::of(&[1, 2, 3]);
//!         cache.complete_put(&value, None, fingerprint);
//!     }
//!     PutClaim::InFlight(pending) => {
//!         pending.wait().unwrap();
//!     }
//!     PutClaim::Done(_) => {}
//! }
//! ```

mod cache;
mod fingerprint;

pub use cache::{
    CacheError, CachedValue, FingerprintValueCache, GetClaim, PendingGet, PendingPut, PutClaim,
};
pub use fingerprint::{Distinguisher, Fingerprint};
