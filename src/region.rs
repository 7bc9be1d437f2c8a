//! Memory-mapped value region with a fragment allocator.
//!
//! The region is one contiguous mapping carved into fixed-size fragments
//! (`extent_size` bytes). Free space is kept as an ordered map of free runs
//! keyed by offset, coalesced on every free. A request is served from the
//! first run large enough to hold it; failing that, it is stitched together
//! from several runs, lowest offset first, so a value may live in
//! non-contiguous extents.
//!
//! ```text
//! offset 0                                                     len
//! +--------+--------+--------+--------+--------+--------+--------+
//! | val A  | val A  |  free  | val B  |  free  |  free  | val A  |
//! +--------+--------+--------+--------+--------+--------+--------+
//!  \____ extent ___/           extent   \____ free run _/  extent
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;

use crate::error::corruption;
use crate::extent::{Allocator, Extent, Extents};

/// Free runs, keyed by offset, with the run length in bytes.
struct FreeRuns {
    runs: BTreeMap<usize, usize>,
    free_bytes: usize,
}

impl FreeRuns {
    fn take(&mut self, need: usize) -> Option<Extents> {
        if self.free_bytes < need {
            return None;
        }

        let mut out = Extents::new();

        // Prefer a single run so small values stay contiguous.
        if let Some((&offset, &len)) = self.runs.iter().find(|(_, &len)| len >= need) {
            self.runs.remove(&offset);
            if len > need {
                self.runs.insert(offset + need, len - need);
            }
            out.push(Extent { offset, len: need });
        } else {
            let mut remaining = need;
            while remaining > 0 {
                let Some((&offset, &len)) = self.runs.iter().next() else {
                    corruption("free byte count exceeds free runs");
                };
                self.runs.remove(&offset);
                if len > remaining {
                    self.runs.insert(offset + remaining, len - remaining);
                    out.push(Extent { offset, len: remaining });
                    remaining = 0;
                } else {
                    out.push(Extent { offset, len });
                    remaining -= len;
                }
            }
        }

        self.free_bytes -= need;
        Some(out)
    }

    fn give_back(&mut self, extent: Extent) {
        let mut offset = extent.offset;
        let mut len = extent.len;

        if let Some((&next_off, _)) = self.runs.range(offset..).next() {
            if next_off < extent.end() {
                corruption("extent freed twice");
            }
        }
        if let Some((&prev_off, &prev_len)) = self.runs.range(..offset).next_back() {
            if prev_off + prev_len > offset {
                corruption("extent freed twice");
            }
            if prev_off + prev_len == offset {
                self.runs.remove(&prev_off);
                offset = prev_off;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.runs.remove(&extent.end()) {
            len += next_len;
        }

        self.runs.insert(offset, len);
        self.free_bytes += extent.len;
    }
}

/// A fixed-size memory-mapped region handing out value storage.
///
/// File-backed regions create an unlinked temporary file in the configured
/// directory, so nothing is left behind once the region is dropped.
pub struct Region {
    /// Keeps the mapping alive; all access goes through `base`.
    _map: MmapMut,
    _file: Option<File>,
    base: *mut u8,
    len: usize,
    extent_size: usize,
    free: Mutex<FreeRuns>,
}

// SAFETY: the mapping never moves until drop. Extents handed out by the
// allocator are disjoint, a value's extents are written only before the entry
// is published, and read only while an entry reference pins them.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Maps `size` bytes of anonymous memory.
    pub fn anonymous(size: usize, extent_size: usize) -> io::Result<Self> {
        let len = round_down(size, extent_size);
        let map = MmapMut::map_anon(len.max(1))?;
        Ok(Self::from_map(map, None, len, extent_size))
    }

    /// Maps `size` bytes of a fresh temporary file created inside `dir`.
    pub fn in_dir(dir: &Path, size: usize, extent_size: usize) -> io::Result<Self> {
        let len = round_down(size, extent_size);
        let file = tempfile::tempfile_in(dir)?;
        file.set_len(len.max(1) as u64)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self::from_map(map, Some(file), len, extent_size))
    }

    fn from_map(mut map: MmapMut, file: Option<File>, len: usize, extent_size: usize) -> Self {
        let base = map.as_mut_ptr();
        let mut runs = BTreeMap::new();
        if len > 0 {
            runs.insert(0, len);
        }
        Region {
            _map: map,
            _file: file,
            base,
            len,
            extent_size,
            free: Mutex::new(FreeRuns {
                runs,
                free_bytes: len,
            }),
        }
    }

    /// Fragment size; every allocation is a multiple of it.
    pub fn extent_size(&self) -> usize {
        self.extent_size
    }

    /// Bytes not currently allocated.
    pub fn free_bytes(&self) -> usize {
        self.free.lock().free_bytes
    }

    /// Number of disjoint free runs. One run means the region is unfragmented.
    pub fn free_runs(&self) -> usize {
        self.free.lock().runs.len()
    }

    #[inline]
    fn check(&self, extent: &Extent) {
        if extent.end() > self.len {
            corruption("extent outside region");
        }
    }
}

impl Allocator for Region {
    fn alloc(&self, size: usize) -> Option<Extents> {
        if size == 0 {
            return Some(Extents::new());
        }
        let need = round_up(size, self.extent_size);
        if need > self.len {
            return None;
        }
        self.free.lock().take(need)
    }

    fn free(&self, extents: &Extents) {
        if extents.is_empty() {
            return;
        }
        let mut free = self.free.lock();
        for extent in extents {
            free.give_back(*extent);
        }
    }

    fn write(&self, extents: &Extents, src: &[u8]) {
        let mut src = src;
        for extent in extents {
            if src.is_empty() {
                break;
            }
            self.check(extent);
            let n = extent.len.min(src.len());
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(extent.offset), n);
            }
            src = &src[n..];
        }
    }

    fn read(&self, extents: &Extents, offset: usize, dst: &mut [u8]) -> usize {
        let mut skip = offset;
        let mut copied = 0;
        for extent in extents {
            if copied == dst.len() {
                break;
            }
            if skip >= extent.len {
                skip -= extent.len;
                continue;
            }
            self.check(extent);
            let n = (extent.len - skip).min(dst.len() - copied);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.base.add(extent.offset + skip),
                    dst[copied..].as_mut_ptr(),
                    n,
                );
            }
            copied += n;
            skip = 0;
        }
        copied
    }

    fn capacity(&self) -> usize {
        self.len
    }
}

#[inline]
pub(crate) fn round_up(n: usize, unit: usize) -> usize {
    n.div_ceil(unit) * unit
}

#[inline]
fn round_down(n: usize, unit: usize) -> usize {
    n / unit * unit
}
