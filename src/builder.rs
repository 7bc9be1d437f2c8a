use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::cache::Cache;
use crate::error::{ConfigError, Result};
use crate::extent::Allocator;
use crate::listener::{EvictionCause, EvictionListener, FnListener, FnMissHandler, MissHandler};
use crate::policy::ReplacementPolicy;
use crate::region::Region;
use crate::EntryRef;

/// Default region size (1 MiB).
pub const DEFAULT_SIZE: usize = 1024 * 1024;
/// Smallest region accepted by [`CacheBuilder::build`].
pub const MIN_SIZE: usize = 64 * 1024;
/// Default fragment size.
pub const DEFAULT_EXTENT_SIZE: usize = 256;
/// Smallest fragment size.
pub const MIN_EXTENT_SIZE: usize = 8;

/// Builder for configuring and constructing a [`Cache`].
///
/// # Example
/// ```
/// use vcache::{CacheBuilder, ReplacementPolicy};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = CacheBuilder::new()
///     .path(dir.path())
///     .size(1024 * 1024)
///     .extent_size(256)
///     .replacement_policy(ReplacementPolicy::Lru)
///     .build()
///     .unwrap();
/// assert_eq!(cache.max_size(), 1024 * 1024);
/// ```
pub struct CacheBuilder {
    path: Option<PathBuf>,
    size: usize,
    extent_size: usize,
    policy: ReplacementPolicy,
    num_shards: usize,
    listener: Option<Arc<dyn EvictionListener>>,
    on_miss: Option<Arc<dyn MissHandler>>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        CacheBuilder {
            path: None,
            size: DEFAULT_SIZE,
            extent_size: DEFAULT_EXTENT_SIZE,
            policy: ReplacementPolicy::default(),
            num_shards: 64,
            listener: None,
            on_miss: None,
        }
    }

    /// Back the region with a temporary file in `dir` instead of anonymous
    /// memory. The file is unlinked on creation.
    pub fn path<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.path = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Maximum resident size in bytes (default: 1 MiB).
    pub fn size(mut self, bytes: usize) -> Self {
        self.size = bytes;
        self
    }

    /// Allocation granularity in bytes (default: 256). Every value occupies a
    /// whole number of extents.
    pub fn extent_size(mut self, bytes: usize) -> Self {
        self.extent_size = bytes;
        self
    }

    pub fn replacement_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the number of index shards (must be a power of two; default: 64).
    pub fn num_shards(mut self, n: usize) -> Self {
        self.num_shards = n;
        self
    }

    /// Register an eviction listener closure.
    ///
    /// # Example
    /// ```
    /// use vcache::CacheBuilder;
    ///
    /// let cache = CacheBuilder::new()
    ///     .eviction_listener(|entry: &vcache::EntryRef, cause| {
    ///         println!("evicted {:?} cause={cause:?}", entry.key());
    ///     })
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn eviction_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntryRef, EvictionCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(FnListener(f)));
        self
    }

    /// Register an eviction listener via the [`EvictionListener`] trait.
    pub fn eviction_listener_impl<L: EvictionListener>(mut self, l: L) -> Self {
        self.listener = Some(Arc::new(l));
        self
    }

    /// Register a miss handler closure.
    pub fn on_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(&Cache, &[u8]) + Send + Sync + 'static,
    {
        self.on_miss = Some(Arc::new(FnMissHandler(f)));
        self
    }

    /// Register a miss handler via the [`MissHandler`] trait.
    pub fn on_miss_impl<M: MissHandler>(mut self, m: M) -> Self {
        self.on_miss = Some(Arc::new(m));
        self
    }

    fn validate_common(&self) -> std::result::Result<(), ConfigError> {
        if self.num_shards == 0 || !self.num_shards.is_power_of_two() {
            return Err(ConfigError::ShardCount(self.num_shards));
        }
        Ok(())
    }

    /// Maps the region and builds the cache.
    pub fn build(self) -> Result<Cache> {
        self.validate_common()?;
        if self.size < MIN_SIZE {
            return Err(ConfigError::RegionTooSmall {
                size: self.size,
                min: MIN_SIZE,
            }
            .into());
        }
        if self.extent_size < MIN_EXTENT_SIZE || self.extent_size > self.size {
            return Err(ConfigError::ExtentSize {
                extent_size: self.extent_size,
                min: MIN_EXTENT_SIZE,
                size: self.size,
            }
            .into());
        }

        let region = match &self.path {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(ConfigError::NotADirectory(dir.display().to_string()).into());
                }
                Region::in_dir(dir, self.size, self.extent_size)?
            }
            None => Region::anonymous(self.size, self.extent_size)?,
        };

        info!(
            size = region.capacity(),
            extent_size = self.extent_size,
            policy = ?self.policy,
            path = ?self.path,
            "cache region mapped"
        );
        let max_size = region.capacity();
        Ok(self.finish(Box::new(region), max_size))
    }

    /// Builds the cache over a caller-supplied allocator. The configured size
    /// becomes the resident budget, capped at the allocator's capacity; path
    /// and extent size are ignored.
    pub fn with_allocator<A: Allocator>(self, allocator: A) -> Result<Cache> {
        self.validate_common()?;
        let max_size = self.size.min(allocator.capacity());
        info!(size = max_size, policy = ?self.policy, "cache created over external allocator");
        Ok(self.finish(Box::new(allocator), max_size))
    }

    fn finish(self, allocator: Box<dyn Allocator>, max_size: usize) -> Cache {
        Cache::new(
            allocator,
            max_size,
            self.num_shards,
            self.policy,
            self.listener,
            self.on_miss,
        )
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
