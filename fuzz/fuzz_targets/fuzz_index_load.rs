#![no_main]
use blockcache_rs::core::index::{BlockIndex, INDEX_FILE};
use libfuzzer_sys::fuzz_target;

// Arbitrary index files must load or be discarded, never panic
fuzz_target!(|input: &[u8]| {
    let dir = match tempfile::TempDir::new() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    if std::fs::write(dir.path().join(INDEX_FILE), input).is_err() {
        return;
    }

    if let Ok(Some(index)) = BlockIndex::load(dir.path()) {
        let _ = index.used_sector_count();
        let _ = index.save(dir.path());
    }
});
