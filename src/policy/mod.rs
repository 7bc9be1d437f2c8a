pub mod lfu;
pub mod lru;
pub mod none;

use crate::entry::EntryRef;

use lfu::LfuPolicy;
use lru::LruPolicy;
use none::NonePolicy;

/// Replacement policy chosen when the cache is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Evict the least recently used entry.
    #[default]
    Lru,
    /// Evict the least frequently used entry, oldest insertion first on ties.
    Lfu,
    /// Never evict; puts that do not fit fail with
    /// [`Error::OutOfSpace`](crate::Error::OutOfSpace).
    None,
}

/// Core eviction strategy.
///
/// All methods are called with the policy lock held. Implementors keep one
/// entry reference per tracked entry and record their position in the
/// entry's slot so `touch` and `untrack` never search.
///
/// References handed back by [`untrack`](Policy::untrack) must be dropped by
/// the caller after the lock is released.
pub(crate) trait Policy: Send {
    /// Starts tracking a freshly linked entry.
    fn track(&mut self, entry: EntryRef);

    /// Records an access. Untracked entries are ignored.
    fn touch(&mut self, entry: &EntryRef);

    /// Tracked entries in eviction order, first victim first.
    fn candidates(&self) -> Box<dyn Iterator<Item = &EntryRef> + '_>;

    /// Returns the entry that should be evicted next, without untracking it.
    fn select_victim(&self) -> Option<EntryRef> {
        self.candidates().next().cloned()
    }

    /// Stops tracking `entry`, returning the policy's reference.
    fn untrack(&mut self, entry: &EntryRef) -> Option<EntryRef>;

    /// Number of tracked entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The policy variants, dispatched without boxing.
pub(crate) enum PolicyEngine {
    Lru(LruPolicy),
    Lfu(LfuPolicy),
    None(NonePolicy),
}

impl PolicyEngine {
    pub(crate) fn new(kind: ReplacementPolicy) -> Self {
        match kind {
            ReplacementPolicy::Lru => PolicyEngine::Lru(LruPolicy::new()),
            ReplacementPolicy::Lfu => PolicyEngine::Lfu(LfuPolicy::new()),
            ReplacementPolicy::None => PolicyEngine::None(NonePolicy),
        }
    }

    /// Untracks every entry, returning the references for release outside the lock.
    pub(crate) fn drain(&mut self) -> Vec<EntryRef> {
        let mut out = Vec::with_capacity(self.len());
        // `victim` is a second reference, so dropping it here never frees.
        while let Some(victim) = self.select_victim() {
            let Some(held) = self.untrack(&victim) else {
                crate::error::corruption("victim was not tracked");
            };
            out.push(held);
        }
        out
    }
}

impl Policy for PolicyEngine {
    #[inline]
    fn track(&mut self, entry: EntryRef) {
        match self {
            PolicyEngine::Lru(p) => p.track(entry),
            PolicyEngine::Lfu(p) => p.track(entry),
            PolicyEngine::None(p) => p.track(entry),
        }
    }

    #[inline]
    fn touch(&mut self, entry: &EntryRef) {
        match self {
            PolicyEngine::Lru(p) => p.touch(entry),
            PolicyEngine::Lfu(p) => p.touch(entry),
            PolicyEngine::None(p) => p.touch(entry),
        }
    }

    #[inline]
    fn candidates(&self) -> Box<dyn Iterator<Item = &EntryRef> + '_> {
        match self {
            PolicyEngine::Lru(p) => p.candidates(),
            PolicyEngine::Lfu(p) => p.candidates(),
            PolicyEngine::None(p) => p.candidates(),
        }
    }

    #[inline]
    fn untrack(&mut self, entry: &EntryRef) -> Option<EntryRef> {
        match self {
            PolicyEngine::Lru(p) => p.untrack(entry),
            PolicyEngine::Lfu(p) => p.untrack(entry),
            PolicyEngine::None(p) => p.untrack(entry),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        match self {
            PolicyEngine::Lru(p) => p.len(),
            PolicyEngine::Lfu(p) => p.len(),
            PolicyEngine::None(p) => p.len(),
        }
    }
}
