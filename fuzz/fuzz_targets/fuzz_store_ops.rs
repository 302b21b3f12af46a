#![no_main]
use blockcache_rs::{BlockStore, Key, StoreConfig};
use libfuzzer_sys::{arbitrary::{Arbitrary, Unstructured}, fuzz_target};

#[derive(Debug, Arbitrary)]
enum StoreOp {
    Put { data: Vec<u8> },
    PutForged { data: Vec<u8>, forged_from: u8 },
    Get { slot: u8 },
    Remove { slot: u8 },
    Lock { slot: u8 },
    Unlock { slot: u8 },
    Resize { sectors: u8 },
}

// Random operation sequences on an 8-byte-sector store; the bitmap must
// match the index after every step
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let ops: Vec<StoreOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let dir = match tempfile::TempDir::new() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let store = match BlockStore::open(StoreConfig {
        directory: dir.path().to_path_buf(),
        capacity: 8 * 32,
        sector_size: 8,
        growth_unit: 8,
        stats_sweep_enabled: false,
        ..StoreConfig::default()
    }) {
        Ok(store) => store,
        Err(_) => return,
    };

    let mut keys: Vec<Key> = Vec::new();
    let slot = |keys: &Vec<Key>, slot: u8| -> Option<Key> {
        if keys.is_empty() {
            None
        } else {
            Some(keys[slot as usize % keys.len()].clone())
        }
    };

    for op in ops.iter().take(64) {
        match op {
            StoreOp::Put { data } => {
                let key = Key::from_content(data);
                if store.put(&key, data).is_ok() {
                    assert_eq!(store.get_length(&key).ok(), Some(data.len() as u64));
                }
                keys.push(key);
            }
            StoreOp::PutForged { data, forged_from } => {
                let key = Key::from_content(&[*forged_from]);
                if data.as_slice() != [*forged_from] {
                    assert!(store.put(&key, data).is_err());
                }
            }
            StoreOp::Get { slot: s } => {
                if let Some(key) = slot(&keys, *s) {
                    if let Ok(data) = store.get(&key) {
                        assert!(key.matches(&data));
                    }
                }
            }
            StoreOp::Remove { slot: s } => {
                if let Some(key) = slot(&keys, *s) {
                    let _ = store.remove(&key);
                    assert!(!store.contains(&key));
                }
            }
            StoreOp::Lock { slot: s } => {
                if let Some(key) = slot(&keys, *s) {
                    store.lock(&key);
                }
            }
            StoreOp::Unlock { slot: s } => {
                if let Some(key) = slot(&keys, *s) {
                    let _ = store.unlock(&key);
                }
            }
            StoreOp::Resize { sectors } => {
                let _ = store.resize(*sectors as u64 * 8);
            }
        }

        let report = store.check_consistency().expect("bitmap readable");
        assert!(report.is_consistent(), "{:?}", report);
    }
});
