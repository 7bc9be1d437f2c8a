use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

use crate::entry::{Backing, EntryRef};
use crate::metrics::stats::Statistic;

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Cache-line padding to prevent false sharing between shards.
///
/// Within a shard, keys hash into an `AHashMap` whose buckets compare the full
/// stored key, so two distinct keys never share a slot.
#[repr(align(64))]
struct Shard {
    map: RwLock<AHashMap<Box<[u8]>, EntryRef>>,
}

// ---------------------------------------------------------------------------
// KeyIndex
// ---------------------------------------------------------------------------

/// A thread-safe index backed by `N` independently-locked shards.
///
/// Lookups take a shard's shared lock, mutations its exclusive lock. Each
/// linked entry holds one reference owned by the index. Displaced references
/// are always handed back to the caller instead of being dropped here, so the
/// final release (and the allocator call it implies) never runs under a
/// shard lock.
pub(crate) struct KeyIndex {
    shards: Box<[Shard]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
    backing: Arc<Backing>,
}

impl KeyIndex {
    pub(crate) fn new(num_shards: usize, backing: Arc<Backing>) -> Self {
        assert!(num_shards.is_power_of_two());
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        KeyIndex {
            shards,
            shard_mask: num_shards - 1,
            build_hasher: RandomState::new(),
            backing,
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let h = self.build_hasher.hash_one(key);
        // Use the high bits (better avalanche from ahash).
        &self.shards[((h >> 32) as usize) & self.shard_mask]
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Links `entry` under its key.
    ///
    /// An existing mapping is swapped out under the same exclusive lock, so a
    /// concurrent lookup sees either the old entry or the new one. The old
    /// entry's index reference is returned.
    pub(crate) fn insert(&self, entry: EntryRef) -> Option<EntryRef> {
        let key: Box<[u8]> = entry.key().into();
        let old = self.shard(&key).map.write().insert(key, entry);
        if old.is_none() {
            self.backing.stats.entry_linked();
        }
        old
    }

    /// Returns a new reference to the entry stored under `key`.
    ///
    /// The reference is taken under the shard lock, so it can never outlive
    /// its storage. When `bump_stat` is set the lookup counts as a user get.
    pub(crate) fn get(&self, key: &[u8], bump_stat: bool) -> Option<EntryRef> {
        let found = self.shard(key).map.read().get(key).cloned();
        if bump_stat {
            match found {
                Some(_) => self.backing.stats.record_hit(),
                None => self.backing.stats.record_miss(),
            }
        }
        found
    }

    /// Unlinks whatever is stored under `key`.
    pub(crate) fn remove(&self, key: &[u8]) -> Option<EntryRef> {
        let removed = self.shard(key).map.write().remove(key);
        if removed.is_some() {
            self.backing.stats.entry_unlinked();
        }
        removed
    }

    /// Unlinks `entry` only if it is still the one stored under its key.
    ///
    /// Used by eviction, where the victim may already have been replaced.
    pub(crate) fn remove_entry(&self, entry: &EntryRef) -> Option<EntryRef> {
        let removed = {
            let mut map = self.shard(entry.key()).map.write();
            match map.get(entry.key()) {
                Some(current) if current.ptr_eq(entry) => map.remove(entry.key()),
                _ => None,
            }
        };
        if removed.is_some() {
            self.backing.stats.entry_unlinked();
        }
        removed
    }

    /// Returns `true` if the key is present.
    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.shard(key).map.read().contains_key(key)
    }

    /// Returns the total number of entries across all shards.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    /// Unlinks every entry, handing each index reference to `release` once.
    ///
    /// Each shard is emptied under its lock; `release` runs after the lock
    /// is dropped.
    pub(crate) fn drain<F: FnMut(EntryRef)>(&self, mut release: F) -> usize {
        let mut drained = 0;
        for shard in self.shards.iter() {
            let map = std::mem::take(&mut *shard.map.write());
            for (_, entry) in map {
                self.backing.stats.entry_unlinked();
                release(entry);
                drained += 1;
            }
        }
        drained
    }

    pub(crate) fn stat(&self, stat: Statistic) -> u64 {
        self.backing.stats.get(stat)
    }
}
