//! Callbacks invoked when an entry leaves the cache or a lookup misses.
//!
//! # Example
//! ```
//! use vcache::listener::EvictionCause;
//! use vcache::CacheBuilder;
//! use std::sync::{Arc, Mutex};
//!
//! let log: Arc<Mutex<Vec<(Vec<u8>, EvictionCause)>>> = Arc::new(Mutex::new(Vec::new()));
//! let log2 = Arc::clone(&log);
//!
//! let cache = CacheBuilder::new()
//!     .eviction_listener(move |entry: &vcache::EntryRef, cause| {
//!         log2.lock().unwrap().push((entry.key().to_vec(), cause));
//!     })
//!     .on_miss(|cache: &vcache::Cache, key: &[u8]| {
//!         let _ = cache.put(key, b"synthesized");
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(cache.get(b"anything").unwrap().to_vec(), b"synthesized");
//! cache.evict(Some(b"anything".as_slice())).unwrap();
//! assert_eq!(log.lock().unwrap()[0].1, EvictionCause::Explicit);
//! ```

use crate::cache::Cache;
use crate::entry::EntryRef;

// ---------------------------------------------------------------------------
// EvictionCause
// ---------------------------------------------------------------------------

/// The reason an entry was evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionCause {
    /// The policy chose this entry to make room for a put, or it was the
    /// victim of [`Cache::evict(None)`](crate::Cache::evict).
    Capacity,
    /// Evicted by key through [`Cache::evict`](crate::Cache::evict).
    Explicit,
}

// ---------------------------------------------------------------------------
// EvictionListener trait
// ---------------------------------------------------------------------------

/// A callback invoked each time an entry is evicted.
///
/// Plain [`Cache::remove`](crate::Cache::remove) and replacement by a newer put
/// do not fire it. The listener runs after the entry is unlinked and without
/// any internal lock held, so it may call back into the cache. The entry's
/// value is still readable for the duration of the call.
pub trait EvictionListener: Send + Sync + 'static {
    fn on_evict(&self, entry: &EntryRef, cause: EvictionCause);
}

/// An [`EvictionListener`] backed by a closure.
pub struct FnListener<F>(pub F);

impl<F> EvictionListener for FnListener<F>
where
    F: Fn(&EntryRef, EvictionCause) + Send + Sync + 'static,
{
    fn on_evict(&self, entry: &EntryRef, cause: EvictionCause) {
        (self.0)(entry, cause)
    }
}

// ---------------------------------------------------------------------------
// MissHandler trait
// ---------------------------------------------------------------------------

/// A callback invoked when [`Cache::get`](crate::Cache::get) finds nothing.
///
/// It runs without any internal lock held and may call
/// [`Cache::put`](crate::Cache::put); the lookup that missed is retried once
/// afterwards, so a value installed here is returned to the original caller.
pub trait MissHandler: Send + Sync + 'static {
    fn on_miss(&self, cache: &Cache, key: &[u8]);
}

/// A [`MissHandler`] backed by a closure.
pub struct FnMissHandler<F>(pub F);

impl<F> MissHandler for FnMissHandler<F>
where
    F: Fn(&Cache, &[u8]) + Send + Sync + 'static,
{
    fn on_miss(&self, cache: &Cache, key: &[u8]) {
        (self.0)(cache, key)
    }
}
