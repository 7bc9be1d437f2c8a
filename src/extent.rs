//! Value storage handles and the allocator interface the cache consumes.

use smallvec::SmallVec;

/// A contiguous byte range inside an allocator's storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub offset: usize,
    pub len: usize,
}

impl Extent {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// The storage backing one value. Most values fit in one or two extents.
pub type Extents = SmallVec<[Extent; 2]>;

/// Total number of bytes covered by `extents`.
#[inline]
pub fn total_len(extents: &[Extent]) -> usize {
    extents.iter().map(|e| e.len).sum()
}

/// Source of value storage.
///
/// The cache calls every method without holding any of its own locks, so
/// implementations must tolerate concurrent callers. `write` is only called on
/// extents that were just returned by `alloc` and not yet published; `read` is
/// only called on extents pinned by a live entry reference.
pub trait Allocator: Send + Sync + 'static {
    /// Reserves at least `size` bytes, possibly as several disjoint extents.
    ///
    /// Returns `None` when the request cannot be satisfied. A failed request
    /// must not leave anything reserved.
    fn alloc(&self, size: usize) -> Option<Extents>;

    /// Returns storage obtained from [`alloc`](Allocator::alloc).
    fn free(&self, extents: &Extents);

    /// Copies `src` into `extents`, in order.
    fn write(&self, extents: &Extents, src: &[u8]);

    /// Copies bytes starting at logical `offset` into `dst`, returning the
    /// number of bytes copied.
    fn read(&self, extents: &Extents, offset: usize, dst: &mut [u8]) -> usize;

    /// Total bytes the allocator can hand out.
    fn capacity(&self) -> usize;
}
