//! Background statistics sweep

use blockcache_rs::{BlockStore, BlockStoreBuilder, Key};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_sweep_publishes_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = BlockStoreBuilder::new()
        .directory(dir.path())
        .sector_size(16)
        .growth_unit(256)
        .capacity(1024)
        .stats_initial_delay(Duration::ZERO)
        .stats_interval(Duration::from_secs(1))
        .build()
        .unwrap();

    let opened = store.stats();
    assert_eq!(opened.used_size, 0);
    assert_eq!(opened.capacity, 1024);

    let data = vec![5u8; 40];
    let key = Key::from_content(&data);
    store.put(&key, &data).unwrap();
    store.lock(&key);

    // One sweep at start, the next a second later
    thread::sleep(Duration::from_millis(2500));

    let swept = store.stats();
    assert_eq!(swept.used_size, 48);
    assert_eq!(swept.free_size, 1024 - 48);
    assert_eq!(swept.pinned_size, 48);
    assert_eq!(swept.block_count, 1);
    assert!(swept.swept_at.is_some());

    store.close().unwrap();
}

#[test]
fn test_disabled_sweep_only_refreshes_on_demand() {
    let dir = TempDir::new().unwrap();
    let store = BlockStoreBuilder::new()
        .directory(dir.path())
        .sector_size(16)
        .growth_unit(256)
        .capacity(1024)
        .without_stats_sweep()
        .build()
        .unwrap();

    // Open seeds the snapshot even with the sweep off
    let opened = store.stats();
    assert!(opened.swept_at.is_some());

    let data = vec![1u8; 16];
    store.put(&Key::from_content(&data), &data).unwrap();
    assert_eq!(store.stats().used_size, 0);

    let fresh = store.refresh_stats();
    assert_eq!(fresh.used_size, 16);
    assert!(fresh.swept_at >= opened.swept_at);
    assert_eq!(store.stats(), fresh);
    assert!((fresh.usage_percent() - 1.5625).abs() < 1e-9);
}

#[test]
fn test_close_stops_sweep() {
    let dir = TempDir::new().unwrap();
    let store: BlockStore = BlockStoreBuilder::new()
        .directory(dir.path())
        .stats_initial_delay(Duration::from_secs(3600))
        .build()
        .unwrap();

    // Close must not wait for the hour-long initial delay
    let started = std::time::Instant::now();
    store.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}
