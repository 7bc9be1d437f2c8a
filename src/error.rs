//! Error types returned by cache operations.
//!
//! Allocation and capacity failures are ordinary results. Internal invariant
//! violations are not: they go through [`corruption`], which logs and aborts.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`Cache`](crate::Cache) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No storage could be found for a value of `requested` bytes, even after
    /// evicting every evictable entry.
    #[error("out of space: cannot store {requested} bytes")]
    OutOfSpace { requested: usize },

    /// The key is not present.
    #[error("key not found")]
    NotFound,

    /// The builder was given an invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Creating or mapping the backing region failed.
    #[error("region I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// Returns `true` for [`Error::OutOfSpace`].
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, Error::OutOfSpace { .. })
    }
}

/// Invalid builder parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The region cannot hold the smallest useful cache.
    #[error("region size {size} is below the minimum of {min} bytes")]
    RegionTooSmall { size: usize, min: usize },

    /// Extents below the minimum, or larger than the region they carve up.
    #[error("extent size {extent_size} must be between {min} and the region size {size}")]
    ExtentSize {
        extent_size: usize,
        min: usize,
        size: usize,
    },

    /// The backing-file path is not an existing directory.
    #[error("{0} is not a directory")]
    NotADirectory(String),

    /// Index shard counts must be a non-zero power of two.
    #[error("shard count {0} must be a non-zero power of two")]
    ShardCount(usize),
}

/// Reports a broken internal invariant and aborts.
///
/// Continuing past a reference-count or membership mismatch risks handing out
/// storage that has already been reused, so there is no recovery path.
#[cold]
pub(crate) fn corruption(what: &str) -> ! {
    tracing::error!(invariant = what, "cache structure corrupted, aborting");
    std::process::abort()
}
