use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::buffer::touch::TouchBuffer;
use crate::builder::CacheBuilder;
use crate::entry::{Backing, EntryRef, UNTRACKED};
use crate::error::{corruption, Error, Result};
use crate::extent::{Allocator, Extents};
use crate::index::KeyIndex;
use crate::listener::{EvictionCause, EvictionListener, MissHandler};
use crate::metrics::stats::{Statistic, Stats};
use crate::policy::{Policy, PolicyEngine, ReplacementPolicy};

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Shared interior of a [`Cache`].
///
/// Lock order is policy mutex, then index shard. Index and policy membership
/// only change together under the policy mutex; lookups never take it.
/// References that might be the last one are collected and dropped after
/// every lock is released, so the allocator is never called under a lock.
pub(crate) struct Inner {
    pub(crate) index: KeyIndex,
    pub(crate) policy: Mutex<PolicyEngine>,
    pub(crate) kind: ReplacementPolicy,
    pub(crate) touches: TouchBuffer,
    pub(crate) backing: Arc<Backing>,
    /// Resident-size budget in bytes.
    pub(crate) max_size: usize,
    pub(crate) listener: RwLock<Option<Arc<dyn EvictionListener>>>,
    pub(crate) on_miss: RwLock<Option<Arc<dyn MissHandler>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let held = self.policy.get_mut().drain();
        let linked = self.index.drain(drop);
        drop(held);
        debug!(entries = linked, "cache destroyed");
    }
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A concurrent byte-string cache over a bounded value region.
///
/// # Example
/// ```
/// use vcache::CacheBuilder;
///
/// let cache = CacheBuilder::new().size(1 << 20).build().unwrap();
/// cache.put(b"bark", b"Lorem ipsum").unwrap();
/// assert_eq!(cache.get(b"bark").unwrap().to_vec(), b"Lorem ipsum");
/// assert!(cache.get(b"meow").is_none());
/// ```
pub struct Cache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("max_size", &self.inner.max_size)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl Clone for Cache {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Cache {
    pub(crate) fn new(
        allocator: Box<dyn Allocator>,
        max_size: usize,
        num_shards: usize,
        kind: ReplacementPolicy,
        listener: Option<Arc<dyn EvictionListener>>,
        on_miss: Option<Arc<dyn MissHandler>>,
    ) -> Self {
        let backing = Arc::new(Backing::new(allocator));
        Cache {
            inner: Arc::new(Inner {
                index: KeyIndex::new(num_shards, Arc::clone(&backing)),
                policy: Mutex::new(PolicyEngine::new(kind)),
                kind,
                touches: TouchBuffer::new(),
                backing,
                max_size,
                listener: RwLock::new(listener),
                on_miss: RwLock::new(on_miss),
            }),
        }
    }

    /// Returns a [`CacheBuilder`] for constructing a new cache.
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    // -----------------------------------------------------------------------
    // Hot-path: get
    // -----------------------------------------------------------------------

    /// Returns a reference to the value stored under `key`.
    ///
    /// On a miss the registered miss handler runs and the lookup is retried
    /// once; the retry does not count as another get.
    pub fn get(&self, key: &[u8]) -> Option<EntryRef> {
        if let Some(entry) = self.inner.index.get(key, true) {
            self.touch(&entry);
            return Some(entry);
        }

        let handler = self.inner.on_miss.read().clone()?;
        trace!(key_len = key.len(), "running miss handler");
        handler.on_miss(self, key);

        let entry = self.inner.index.get(key, false)?;
        self.touch(&entry);
        Some(entry)
    }

    /// Copies the value stored under `key`, starting at `offset`, into `buf`.
    ///
    /// Returns the full length of the value, which may be larger than the
    /// number of bytes copied.
    pub fn get_into(&self, key: &[u8], offset: usize, buf: &mut [u8]) -> Option<usize> {
        let entry = self.get(key)?;
        entry.read(offset, buf);
        Some(entry.len())
    }

    /// Returns the value length for `key` without counting a get or
    /// refreshing the entry's position.
    pub fn exists(&self, key: &[u8]) -> Option<usize> {
        self.inner.index.get(key, false).map(|e| e.len())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.index.contains(key)
    }

    fn touch(&self, entry: &EntryRef) {
        if self.inner.kind == ReplacementPolicy::None {
            return;
        }
        if let Err(entry) = self.inner.touches.push(entry.clone()) {
            trace!("touch buffer full, applying synchronously");
            let mut released = Vec::new();
            {
                let mut policy = self.inner.policy.lock();
                self.apply_touches(&mut policy, &mut released);
                policy.touch(&entry);
            }
            drop(entry);
        }
    }

    /// Applies buffered touches.
    ///
    /// A drained reference to a still-tracked entry is dropped right away,
    /// which can never free storage because the policy holds another one, and
    /// leaves the entry unpinned for victim selection. References to entries
    /// already unlinked go to `released` so they outlive the policy lock.
    fn apply_touches(&self, policy: &mut PolicyEngine, released: &mut Vec<EntryRef>) {
        let mut drained = Vec::new();
        self.inner.touches.drain(&mut drained);
        for entry in drained {
            policy.touch(&entry);
            if entry.entry().slot() == UNTRACKED {
                released.push(entry);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Hot-path: put
    // -----------------------------------------------------------------------

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Evicts entries under the replacement policy until the value fits.
    /// Fails with [`Error::OutOfSpace`] if it cannot, in which case the
    /// previous value (if any) is still in place.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let extents = self.reserve(value.len())?;
        self.inner.backing.allocator.write(&extents, value);
        let entry = EntryRef::new(key, value.len(), extents, Arc::clone(&self.inner.backing));

        let mut released = Vec::new();
        {
            let mut policy = self.inner.policy.lock();
            self.apply_touches(&mut policy, &mut released);
            if let Some(old) = self.inner.index.insert(entry.clone()) {
                if let Some(held) = policy.untrack(&old) {
                    released.push(held);
                }
                released.push(old);
            }
            policy.track(entry);
        }
        drop(released);

        self.inner.backing.stats.record_put();
        Ok(())
    }

    /// Obtains storage for `size` bytes, evicting unpinned entries first.
    fn reserve(&self, size: usize) -> Result<Extents> {
        if size > self.inner.max_size {
            warn!(size, max_size = self.inner.max_size, "value larger than cache");
            return Err(Error::OutOfSpace { requested: size });
        }

        loop {
            self.make_room(size)?;
            if let Some(extents) = self.inner.backing.allocator.alloc(size) {
                return Ok(extents);
            }
            // Within budget but the allocator is short, e.g. a concurrent put
            // took the space between the two steps.
            if !self.evict_victim() {
                warn!(size, policy = ?self.inner.kind, "allocator has no space for value");
                return Err(Error::OutOfSpace { requested: size });
            }
        }
    }

    /// Evicts unpinned entries, in policy order, until `size` more bytes fit
    /// under the budget.
    ///
    /// Victims are chosen before anything is unlinked: when the unpinned
    /// entries cannot cover the shortfall, nothing is evicted.
    fn make_room(&self, size: usize) -> Result<()> {
        let mut released = Vec::new();
        let mut victims = Vec::new();
        {
            let mut policy = self.inner.policy.lock();
            self.apply_touches(&mut policy, &mut released);

            let resident = self.inner.backing.stats.get(Statistic::Size) as usize;
            let mut shortfall = (resident + size).saturating_sub(self.inner.max_size);
            if shortfall == 0 {
                return Ok(());
            }
            for entry in policy.candidates() {
                if entry.is_pinned() || entry.reserved() == 0 {
                    continue;
                }
                victims.push(entry.clone());
                shortfall = shortfall.saturating_sub(entry.reserved());
                if shortfall == 0 {
                    break;
                }
            }
            if shortfall > 0 {
                warn!(size, resident, policy = ?self.inner.kind, "no space for value");
                return Err(Error::OutOfSpace { requested: size });
            }

            for victim in &victims {
                let Some(held) = policy.untrack(victim) else {
                    corruption("victim was not tracked");
                };
                let Some(linked) = self.inner.index.remove_entry(victim) else {
                    corruption("tracked entry missing from index");
                };
                released.push(held);
                released.push(linked);
            }
        }
        drop(released);

        for victim in &victims {
            self.evicted(victim, EvictionCause::Capacity);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Removal and eviction
    // -----------------------------------------------------------------------

    /// Removes `key`. Returns [`Error::NotFound`] if it was not present, in
    /// which case nothing changes.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.unlink(key).map(drop).ok_or(Error::NotFound)
    }

    /// Removes `key` if present. Returns whether anything was removed.
    pub fn discard(&self, key: &[u8]) -> bool {
        self.unlink(key).is_some()
    }

    /// Evicts `key`, or the first victim in policy order that no reader holds
    /// when `key` is `None`.
    ///
    /// Unlike [`remove`](Cache::remove) this counts as an eviction and fires
    /// the eviction listener.
    pub fn evict(&self, key: Option<&[u8]>) -> Result<()> {
        match key {
            Some(key) => {
                let entry = self.unlink(key).ok_or(Error::NotFound)?;
                self.evicted(&entry, EvictionCause::Explicit);
                Ok(())
            }
            None => {
                if self.evict_victim() {
                    Ok(())
                } else {
                    Err(Error::NotFound)
                }
            }
        }
    }

    /// Unlinks `key` from the index and the policy, returning one reference
    /// so the caller decides when it is released.
    fn unlink(&self, key: &[u8]) -> Option<EntryRef> {
        let mut released = Vec::new();
        let entry = {
            let mut policy = self.inner.policy.lock();
            self.apply_touches(&mut policy, &mut released);
            let entry = self.inner.index.remove(key)?;
            if let Some(held) = policy.untrack(&entry) {
                released.push(held);
            }
            entry
        };
        drop(released);
        Some(entry)
    }

    /// Evicts the first unpinned entry in policy order. Returns `false` when
    /// there is none.
    fn evict_victim(&self) -> bool {
        let mut released = Vec::new();
        let victim = {
            let mut policy = self.inner.policy.lock();
            self.apply_touches(&mut policy, &mut released);
            let Some(victim) = policy.candidates().find(|e| !e.is_pinned()).cloned() else {
                return false;
            };
            let Some(held) = policy.untrack(&victim) else {
                corruption("victim was not tracked");
            };
            let Some(linked) = self.inner.index.remove_entry(&victim) else {
                corruption("tracked entry missing from index");
            };
            released.push(held);
            released.push(linked);
            victim
        };
        drop(released);

        self.evicted(&victim, EvictionCause::Capacity);
        true
    }

    fn evicted(&self, entry: &EntryRef, cause: EvictionCause) {
        self.inner.backing.stats.record_eviction(1);
        debug!(key_len = entry.key().len(), size = entry.reserved(), ?cause, "evicted");
        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_evict(entry, cause);
        }
    }

    // -----------------------------------------------------------------------
    // Bulk / admin operations
    // -----------------------------------------------------------------------

    /// Removes every entry. Storage pinned by readers is released when they
    /// drop their references. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut released = Vec::new();
        let removed = {
            let mut policy = self.inner.policy.lock();
            self.apply_touches(&mut policy, &mut released);
            let removed = self.inner.index.drain(|e| released.push(e));
            released.extend(policy.drain());
            removed
        };
        drop(released);
        removed
    }

    /// Installs (or replaces) the miss handler.
    pub fn callback_on_miss<F>(&self, f: F)
    where
        F: Fn(&Cache, &[u8]) + Send + Sync + 'static,
    {
        *self.inner.on_miss.write() = Some(Arc::new(crate::listener::FnMissHandler(f)));
    }

    /// Installs (or replaces) the eviction listener.
    pub fn callback_on_evict<F>(&self, f: F)
    where
        F: Fn(&EntryRef, EvictionCause) + Send + Sync + 'static,
    {
        *self.inner.listener.write() = Some(Arc::new(crate::listener::FnListener(f)));
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Reads one statistic.
    pub fn stat(&self, stat: Statistic) -> u64 {
        self.inner.index.stat(stat)
    }

    pub fn stats(&self) -> Stats {
        self.inner.backing.stats.snapshot()
    }

    /// Number of entries reachable by key.
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    /// Resident-size budget in bytes.
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn replacement_policy(&self) -> ReplacementPolicy {
        self.inner.kind
    }

    /// Number of entries the policy tracks. Equal to [`len`](Cache::len)
    /// whenever no put or remove is in flight, except under
    /// [`ReplacementPolicy::None`], which tracks nothing.
    pub fn tracked(&self) -> usize {
        self.inner.policy.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(size: usize, extent: usize, policy: ReplacementPolicy) -> Cache {
        CacheBuilder::new()
            .size(size)
            .extent_size(extent)
            .replacement_policy(policy)
            .build()
            .expect("valid config")
    }

    #[test]
    fn membership_matches_after_mixed_operations() {
        let c = cache(64 * 1024, 256, ReplacementPolicy::Lru);
        for i in 0..100u32 {
            c.put(format!("k{i}").as_bytes(), &[0u8; 1000]).unwrap();
            if i % 3 == 0 {
                c.discard(format!("k{}", i / 2).as_bytes());
            }
            let _ = c.get(format!("k{}", i / 4).as_bytes());
        }
        assert_eq!(c.len(), c.tracked());
        assert_eq!(c.stat(Statistic::Entries) as usize, c.len());
    }

    #[test]
    fn touches_are_applied_before_victim_selection() {
        let c = cache(64 * 1024, 1024, ReplacementPolicy::Lru);
        c.put(b"a", &[1u8; 100]).unwrap();
        c.put(b"b", &[2u8; 100]).unwrap();
        let _ = c.get(b"a");
        assert_eq!(c.inner.touches.len(), 1);
        c.evict(None).unwrap();
        assert!(c.contains(b"a"));
        assert!(!c.contains(b"b"));
        assert_eq!(c.inner.touches.len(), 0);
    }

    #[test]
    fn lfu_keeps_frequently_read_entries() {
        let c = cache(64 * 1024, 16 * 1024, ReplacementPolicy::Lfu);
        for k in [b"a", b"b", b"c", b"d"] {
            c.put(k, &[0u8; 16 * 1024]).unwrap();
        }
        for _ in 0..3 {
            let _ = c.get(b"a");
            let _ = c.get(b"c");
        }
        let _ = c.get(b"d");
        c.put(b"e", &[0u8; 16 * 1024]).unwrap();
        assert!(!c.contains(b"b"), "b was never read");
        c.put(b"f", &[0u8; 16 * 1024]).unwrap();
        assert!(!c.contains(b"e"), "e is the only entry left at base frequency");
        assert!(c.contains(b"a") && c.contains(b"c") && c.contains(b"d"));
    }

    #[test]
    fn clear_releases_everything() {
        let c = cache(64 * 1024, 256, ReplacementPolicy::Lru);
        for i in 0..10u32 {
            c.put(&i.to_le_bytes(), b"value").unwrap();
        }
        assert_eq!(c.clear(), 10);
        assert!(c.is_empty());
        assert_eq!(c.tracked(), 0);
        assert_eq!(c.stat(Statistic::Size), 0);
        assert_eq!(c.stat(Statistic::Entries), 0);
    }
}
