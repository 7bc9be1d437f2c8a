use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use vcache::{
    total_len, Allocator, Cache, CacheBuilder, Extents, Region, ReplacementPolicy, Statistic,
};

const THREADS: usize = 8;
const PER_THREAD: usize = 500;

/// Wraps a [`Region`] and overwrites storage with a marker byte before
/// handing it back, so a read of released storage is visible.
struct Tombstoning {
    region: Region,
    freed: Arc<AtomicUsize>,
}

const TOMBSTONE: u8 = 0xDD;

impl Allocator for Tombstoning {
    fn alloc(&self, size: usize) -> Option<Extents> {
        self.region.alloc(size)
    }

    fn free(&self, extents: &Extents) {
        let junk = vec![TOMBSTONE; total_len(extents)];
        self.region.write(extents, &junk);
        self.region.free(extents);
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    fn write(&self, extents: &Extents, src: &[u8]) {
        self.region.write(extents, src)
    }

    fn read(&self, extents: &Extents, offset: usize, dst: &mut [u8]) -> usize {
        self.region.read(extents, offset, dst)
    }

    fn capacity(&self) -> usize {
        self.region.capacity()
    }
}

fn tombstoning_cache(size: usize, policy: ReplacementPolicy) -> (Cache, Arc<AtomicUsize>) {
    let freed = Arc::new(AtomicUsize::new(0));
    let alloc = Tombstoning {
        region: Region::anonymous(size, 64).unwrap(),
        freed: Arc::clone(&freed),
    };
    let cache = CacheBuilder::new()
        .size(size)
        .replacement_policy(policy)
        .with_allocator(alloc)
        .unwrap();
    (cache, freed)
}

/// Value for key `i`: a length and fill byte that both depend on `i`.
fn value_for(i: usize) -> Vec<u8> {
    vec![(i % 200) as u8 + 1; 64 + (i % 9) * 50]
}

#[test]
fn concurrent_distinct_puts_are_all_present() {
    let cache = CacheBuilder::new().size(4 << 20).build().unwrap();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let c = cache.clone();
            thread::spawn(move || {
                for j in 0..PER_THREAD {
                    let key = format!("t{t}-k{j}");
                    c.put(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.len(), THREADS * PER_THREAD);
    assert_eq!(cache.tracked(), THREADS * PER_THREAD);
    assert_eq!(cache.stat(Statistic::Puts) as usize, THREADS * PER_THREAD);
    for t in 0..THREADS {
        for j in 0..PER_THREAD {
            let key = format!("t{t}-k{j}");
            assert_eq!(cache.get(key.as_bytes()).unwrap().to_vec(), key.as_bytes());
        }
    }
}

#[test]
fn readers_never_observe_released_storage() {
    let (cache, freed) = tombstoning_cache(64 * 1024, ReplacementPolicy::Lru);
    let keys = 256usize;
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let c = cache.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    let i = (t * 7919 + round * 31) % keys;
                    c.put(&i.to_le_bytes(), &value_for(i)).unwrap();
                    if round % 5 == 0 {
                        c.discard(&((i + 1) % keys).to_le_bytes());
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|t| {
            let c = cache.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seen = 0usize;
                let mut i = t;
                while !stop.load(Ordering::Relaxed) {
                    i = (i + 13) % keys;
                    if let Some(entry) = c.get(&i.to_le_bytes()) {
                        // Give writers a chance to evict it while we hold it.
                        thread::yield_now();
                        assert_eq!(entry.to_vec(), value_for(i), "key {i}");
                        seen += 1;
                    }
                }
                seen
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }

    assert!(freed.load(Ordering::Relaxed) > 0, "eviction pressure freed storage");
    assert!(cache.stat(Statistic::Size) as usize <= 64 * 1024);
    assert_eq!(cache.len(), cache.tracked());
}

#[test]
fn concurrent_same_key_puts_leave_one_entry() {
    let cache = CacheBuilder::new().build().unwrap();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let c = cache.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    c.put(b"contended", &[t as u8; 100]).unwrap();
                    let v = c.get(b"contended").unwrap().to_vec();
                    assert!(v.iter().all(|&b| b == v[0]), "torn value");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stat(Statistic::Entries), 1);
}

#[test]
fn every_storage_block_is_freed_once_after_drop() {
    let (cache, freed) = tombstoning_cache(64 * 1024, ReplacementPolicy::Lfu);
    let mut stored = 0;
    for i in 0..1_000usize {
        cache.put(&i.to_le_bytes(), &value_for(i)).unwrap();
        stored += 1;
        if i % 3 == 0 {
            let _ = cache.get(&(i / 3).to_le_bytes());
        }
    }
    let held = cache.get(&999usize.to_le_bytes()).unwrap();
    drop(cache);
    assert!(freed.load(Ordering::Relaxed) < stored, "held entry is still live");
    drop(held);
    assert_eq!(freed.load(Ordering::Relaxed), stored);
}

#[test]
fn replaced_value_lives_until_its_reader_lets_go() {
    let (cache, freed) = tombstoning_cache(64 * 1024, ReplacementPolicy::Lru);
    cache.put(b"k", b"first value").unwrap();
    let reader = cache.get(b"k").unwrap();
    assert_eq!(cache.stat(Statistic::Size), 64);

    cache.put(b"k", b"second value").unwrap();
    assert_eq!(cache.get(b"k").unwrap().to_vec(), b"second value");
    assert_eq!(reader.to_vec(), b"first value", "no tombstone while held");
    assert_eq!(freed.load(Ordering::Relaxed), 0);
    assert_eq!(cache.stat(Statistic::Size), 128, "both values are resident");
    assert_eq!(cache.len(), 1);

    drop(reader);
    assert_eq!(freed.load(Ordering::Relaxed), 1);
    assert_eq!(cache.stat(Statistic::Size), 64);
}
