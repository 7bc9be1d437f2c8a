//! Cache entries and the counted handles that keep them alive.
//!
//! An entry is shared by up to three kinds of holder: the key index (one
//! reference while linked), the policy engine (one reference while tracked)
//! and any number of in-flight readers. Acquiring a reference is `clone`,
//! releasing it is `drop`. The value storage goes back to the allocator
//! exactly once, when the last reference is released, which may happen on a
//! reader thread long after the entry was unlinked.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::extent::{total_len, Allocator, Extents};
use crate::metrics::stats::StatsCounter;

/// Sentinel stored in [`CacheEntry::slot`] while the policy does not track the entry.
pub(crate) const UNTRACKED: usize = usize::MAX;

/// References the cache itself holds on a linked, tracked entry: one for the
/// index and one for the policy.
const CACHE_HOLDERS: usize = 2;

/// Value storage plus the counters that account for it.
pub(crate) struct Backing {
    pub(crate) allocator: Box<dyn Allocator>,
    pub(crate) stats: StatsCounter,
}

impl Backing {
    pub(crate) fn new(allocator: Box<dyn Allocator>) -> Self {
        Backing {
            allocator,
            stats: StatsCounter::new(),
        }
    }
}

pub(crate) struct CacheEntry {
    key: Box<[u8]>,
    value_len: usize,
    extents: Extents,
    /// Bytes reserved from the allocator (`value_len` rounded up to fragments).
    reserved: usize,
    /// Policy arena position, or [`UNTRACKED`]. Only written under the policy lock.
    slot: AtomicUsize,
    backing: Arc<Backing>,
}

impl CacheEntry {
    #[inline]
    pub(crate) fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Release);
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.backing.allocator.free(&self.extents);
        self.backing.stats.storage_released(self.reserved);
    }
}

/// A counted reference to a cache entry.
///
/// The value bytes stay valid for as long as the `EntryRef` exists, even if
/// the key is overwritten, removed or evicted in the meantime.
#[derive(Clone)]
pub struct EntryRef(Arc<CacheEntry>);

impl EntryRef {
    /// Builds an entry over storage already filled with the value.
    ///
    /// The storage is charged to the resident size here, so that a failure
    /// anywhere after this point still releases it through `Drop`.
    pub(crate) fn new(key: &[u8], value_len: usize, extents: Extents, backing: Arc<Backing>) -> Self {
        let reserved = total_len(&extents);
        backing.stats.storage_acquired(reserved);
        EntryRef(Arc::new(CacheEntry {
            key: key.into(),
            value_len,
            extents,
            reserved,
            slot: AtomicUsize::new(UNTRACKED),
            backing,
        }))
    }

    /// The key this entry was stored under.
    pub fn key(&self) -> &[u8] {
        &self.0.key
    }

    /// Length of the value in bytes.
    pub fn len(&self) -> usize {
        self.0.value_len
    }

    pub fn is_empty(&self) -> bool {
        self.0.value_len == 0
    }

    /// Bytes of region storage this entry holds.
    pub fn reserved(&self) -> usize {
        self.0.reserved
    }

    /// Copies value bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, which is short when the value ends
    /// before `buf` is full and zero when `offset` is past the end.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= self.0.value_len {
            return 0;
        }
        let want = (self.0.value_len - offset).min(buf.len());
        self.0
            .backing
            .allocator
            .read(&self.0.extents, offset, &mut buf[..want])
    }

    /// Copies the whole value out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.0.value_len];
        let n = self.read(0, &mut out);
        out.truncate(n);
        out
    }

    #[inline]
    pub(crate) fn entry(&self) -> &CacheEntry {
        &self.0
    }

    #[inline]
    pub(crate) fn ptr_eq(&self, other: &EntryRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live references, including this one.
    #[cfg(test)]
    pub(crate) fn references(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether a reader (or a buffered touch) holds this linked entry.
    ///
    /// Evicting a pinned entry frees nothing until the holder lets go. Only
    /// meaningful while the entry is both linked and tracked.
    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.0) > CACHE_HOLDERS
    }
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("key", &String::from_utf8_lossy(&self.0.key))
            .field("len", &self.0.value_len)
            .field("reserved", &self.0.reserved)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::metrics::stats::Statistic;

    #[test]
    fn storage_is_released_with_the_last_reference() {
        let backing = backing(4096, 256);
        let e = entry(&backing, b"k", b"value");
        let reader = e.clone();
        assert_eq!(backing.stats.get(Statistic::Size), 256);

        drop(e);
        assert_eq!(backing.stats.get(Statistic::Size), 256, "reader still pins storage");
        assert_eq!(reader.to_vec(), b"value");

        drop(reader);
        assert_eq!(backing.stats.get(Statistic::Size), 0);
    }

    #[test]
    fn extra_holders_pin_an_entry() {
        let backing = backing(4096, 256);
        let e = entry(&backing, b"k", b"v");
        let second = e.clone();
        assert!(!e.is_pinned(), "two holders is the cache's own share");
        let reader = e.clone();
        assert!(second.is_pinned());
        drop(reader);
        assert!(!second.is_pinned());
    }

    #[test]
    fn partial_reads_respect_value_length() {
        let backing = backing(4096, 256);
        let e = entry(&backing, b"k", b"Lorem ipsum");
        let mut buf = [0u8; 64];
        assert_eq!(e.read(6, &mut buf), 5);
        assert_eq!(&buf[..5], b"ipsum");
        assert_eq!(e.read(11, &mut buf), 0);
        assert_eq!(e.references(), 1);
    }
}
