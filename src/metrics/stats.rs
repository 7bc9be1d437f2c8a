use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::corruption;

/// Names of the counters a cache keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Statistic {
    /// Successful puts.
    Puts,
    /// User-visible lookups.
    Gets,
    /// Lookups that found an entry.
    Hits,
    /// Lookups that found nothing.
    Misses,
    /// Entries removed to make room, or through [`Cache::evict`](crate::Cache::evict).
    Evictions,
    /// Entries currently reachable by key.
    Entries,
    /// Bytes of value storage currently held, including storage of unlinked
    /// entries that a reader still pins.
    Size,
}

impl Statistic {
    pub const ALL: [Statistic; 7] = [
        Statistic::Puts,
        Statistic::Gets,
        Statistic::Hits,
        Statistic::Misses,
        Statistic::Evictions,
        Statistic::Entries,
        Statistic::Size,
    ];
}

/// Atomic counters updated on every cache operation.
///
/// Every counter is updated with its own atomic, so no update is ever lost,
/// but a snapshot is not taken at a single logical instant.
pub struct StatsCounter {
    puts: AtomicU64,
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    entries: AtomicU64,
    size: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        StatsCounter {
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            size: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hit(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn entry_linked(&self) {
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn entry_unlinked(&self) {
        if self.entries.fetch_sub(1, Ordering::Relaxed) == 0 {
            corruption("entry count underflow");
        }
    }

    #[inline]
    pub fn storage_acquired(&self, bytes: usize) {
        self.size.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn storage_released(&self, bytes: usize) {
        if self.size.fetch_sub(bytes as u64, Ordering::Relaxed) < bytes as u64 {
            corruption("resident size underflow");
        }
    }

    /// Reads one counter.
    pub fn get(&self, stat: Statistic) -> u64 {
        let counter = match stat {
            Statistic::Puts => &self.puts,
            Statistic::Gets => &self.gets,
            Statistic::Hits => &self.hits,
            Statistic::Misses => &self.misses,
            Statistic::Evictions => &self.evictions,
            Statistic::Entries => &self.entries,
            Statistic::Size => &self.size,
        };
        counter.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub fn snapshot(&self) -> Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0_f64
        } else {
            hits as f64 / total as f64
        };
        Stats {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub puts: u64,
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: u64,
    /// Resident bytes.
    pub size: u64,
    /// `hits / (hits + misses)`, or `0.0` if no lookups have been made.
    pub hit_rate: f64,
}

impl Stats {
    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_and_misses_both_count_as_gets() {
        let s = StatsCounter::new();
        s.record_hit();
        s.record_hit();
        s.record_miss();
        assert_eq!(s.get(Statistic::Gets), 3);
        let snap = s.snapshot();
        assert_eq!(snap.request_count(), 3);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn size_rises_and_falls() {
        let s = StatsCounter::new();
        s.storage_acquired(512);
        s.storage_acquired(256);
        s.storage_released(512);
        assert_eq!(s.get(Statistic::Size), 256);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let s = std::sync::Arc::new(StatsCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = std::sync::Arc::clone(&s);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        s.record_put();
                        s.entry_linked();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.get(Statistic::Puts), 40_000);
        assert_eq!(s.get(Statistic::Entries), 40_000);
    }
}
