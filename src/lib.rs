//! A concurrent, size-bounded cache of byte-string values.
//!
//! Values live in a fixed memory region (anonymous, or backed by an unlinked
//! file) carved into extents. When a put does not fit, the replacement policy
//! picks victims until it does. Readers hold reference-counted [`EntryRef`]s,
//! so an evicted value stays readable until its last reader lets go.

mod buffer;
mod builder;
mod cache;
mod entry;
mod error;
mod extent;
mod index;
pub mod listener;
mod metrics;
mod policy;
mod region;

pub use builder::{CacheBuilder, DEFAULT_EXTENT_SIZE, DEFAULT_SIZE, MIN_EXTENT_SIZE, MIN_SIZE};
pub use cache::Cache;
pub use entry::EntryRef;
pub use error::{ConfigError, Error, Result};
pub use extent::{total_len, Allocator, Extent, Extents};
pub use listener::{EvictionCause, EvictionListener, MissHandler};
pub use metrics::stats::{Statistic, Stats};
pub use policy::ReplacementPolicy;
pub use region::Region;
