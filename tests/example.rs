//! End-to-end walk through the typical lifecycle: a miss, a put, and a miss
//! handler that fills in a value.

use vcache::{Cache, CacheBuilder, ReplacementPolicy, Statistic};

/// Reads `key` into a fixed buffer the way a caller with its own storage
/// would. Returns `None` on a miss.
fn fetch(cache: &Cache, key: &str) -> Option<String> {
    let mut buf = [0u8; 128];
    let len = cache.get_into(key.as_bytes(), 0, &mut buf)?;
    Some(String::from_utf8_lossy(&buf[..len.min(buf.len())]).into_owned())
}

#[test]
fn miss_put_and_miss_handler() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheBuilder::new()
        .path(dir.path())
        .size(1_048_576)
        .extent_size(256)
        .replacement_policy(ReplacementPolicy::Lru)
        .build()
        .unwrap();

    assert_eq!(fetch(&cache, "meow"), None);

    cache.put(b"bark", b"Lorem ipsum").unwrap();
    assert_eq!(fetch(&cache, "bark").as_deref(), Some("Lorem ipsum"));

    cache.callback_on_miss(|cache: &Cache, _key: &[u8]| {
        cache.put(b"meow", b"Cthulhu fthagn").unwrap();
    });
    assert_eq!(fetch(&cache, "meow").as_deref(), Some("Cthulhu fthagn"));

    let stats = cache.stats();
    assert_eq!(stats.gets, 3);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.puts, 2);
    assert_eq!(cache.stat(Statistic::Entries), 2);
    assert_eq!(cache.stat(Statistic::Size), 512);
}

#[test]
fn handler_filling_a_different_key_still_misses() {
    let cache = CacheBuilder::new().build().unwrap();
    cache.callback_on_miss(|cache: &Cache, _key: &[u8]| {
        cache.put(b"meow", b"Cthulhu fthagn").unwrap();
    });

    assert_eq!(fetch(&cache, "woof"), None);
    assert_eq!(cache.exists(b"meow"), Some(14));
    assert_eq!(fetch(&cache, "meow").as_deref(), Some("Cthulhu fthagn"));
}
