//! Persisted key → location index
//!
//! The index and the store capacity are checkpointed together into
//! `index.bin`: a bincode body followed by its CRC32 (little endian). Saves
//! go through a temporary file and a rename so a crash leaves either the old
//! or the new index, never a torn one.

use crate::core::cluster::ClusterInfo;
use crate::core::error::Result;
use crate::core::key::Key;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const INDEX_FILE: &str = "index.bin";
const INDEX_TMP_FILE: &str = "index.bin.tmp";
const INDEX_VERSION: u32 = 1;

#[derive(Serialize)]
struct IndexFileRef<'a> {
    version: u32,
    size: u64,
    sector_size: u64,
    clusters: Vec<(&'a Key, &'a ClusterInfo)>,
}

#[derive(Deserialize)]
struct IndexFile {
    version: u32,
    size: u64,
    sector_size: u64,
    clusters: Vec<(Key, ClusterInfo)>,
}

/// In-memory index plus the persisted capacity
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    /// Store capacity in bytes
    pub size: u64,
    /// Sector size the entries were written with
    pub sector_size: u64,
    clusters: AHashMap<Key, ClusterInfo>,
    /// Last access sequence handed out
    clock: u64,
}

impl BlockIndex {
    pub fn new(size: u64, sector_size: u64) -> Self {
        BlockIndex {
            size,
            sector_size,
            clusters: AHashMap::new(),
            clock: 0,
        }
    }

    /// Load the index from `dir`
    ///
    /// Returns `Ok(None)` when there is no index yet, or when the file fails
    /// its checksum or cannot be decoded (logged; the caller starts empty).
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Option<Self>> {
        let path = dir.as_ref().join(INDEX_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if raw.len() < 4 {
            tracing::warn!("Index {} is truncated, discarding", path.display());
            return Ok(None);
        }

        let (body, trailer) = raw.split_at(raw.len() - 4);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(trailer);
        if crc32fast::hash(body) != u32::from_le_bytes(crc) {
            tracing::warn!("Index {} failed checksum, discarding", path.display());
            return Ok(None);
        }

        let file: IndexFile = match bincode::deserialize(body) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Index {} could not be decoded ({}), discarding", path.display(), e);
                return Ok(None);
            }
        };

        if file.version != INDEX_VERSION {
            tracing::warn!(
                "Index {} has unsupported version {}, discarding",
                path.display(),
                file.version
            );
            return Ok(None);
        }

        // Sequences are not persisted; replay entries oldest first so the
        // access order survives a reopen at second resolution
        let mut clusters = file.clusters;
        clusters.sort_by(|a, b| {
            a.1.update_time
                .cmp(&b.1.update_time)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut index = BlockIndex::new(file.size, file.sector_size);
        index.clusters.reserve(clusters.len());
        for (key, cluster) in clusters {
            index.insert(key, cluster);
        }
        Ok(Some(index))
    }

    /// Checkpoint the index into `dir`
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let mut clusters: Vec<_> = self.clusters.iter().collect();
        clusters.sort_by(|a, b| a.0.cmp(b.0));

        let body = bincode::serialize(&IndexFileRef {
            version: INDEX_VERSION,
            size: self.size,
            sector_size: self.sector_size,
            clusters,
        })?;

        let tmp_path = dir.join(INDEX_TMP_FILE);
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&body)?;
            file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, dir.join(INDEX_FILE))?;

        Ok(())
    }

    pub fn get(&self, key: &Key) -> Option<&ClusterInfo> {
        self.clusters.get(key)
    }

    pub fn get_mut(&mut self, key: &Key) -> Option<&mut ClusterInfo> {
        self.clusters.get_mut(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.clusters.contains_key(key)
    }

    /// Insert `cluster` as the most recently used entry
    pub fn insert(&mut self, key: Key, mut cluster: ClusterInfo) {
        cluster.access_seq = self.tick();
        self.clusters.insert(key, cluster);
    }

    /// Mark `key` as the most recently used entry
    pub fn touch(&mut self, key: &Key) -> Option<&ClusterInfo> {
        let seq = self.tick();
        let cluster = self.clusters.get_mut(key)?;
        cluster.touch();
        cluster.access_seq = seq;
        Some(&*cluster)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn remove(&mut self, key: &Key) -> Option<ClusterInfo> {
        self.clusters.remove(key)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.clusters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &ClusterInfo)> {
        self.clusters.iter()
    }

    /// Every sector referenced by any entry
    pub fn occupied_sectors(&self) -> impl Iterator<Item = u64> + '_ {
        self.clusters
            .values()
            .flat_map(|cluster| cluster.sectors.iter().copied())
    }

    /// Total sectors referenced by all entries
    pub fn used_sector_count(&self) -> u64 {
        self.clusters
            .values()
            .map(|cluster| cluster.sectors.len() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> BlockIndex {
        let mut index = BlockIndex::new(1024, 8);
        index.insert(Key::from_content(b"a"), ClusterInfo::new(vec![0, 1], 10));
        index.insert(Key::from_content(b"b"), ClusterInfo::new(vec![2], 3));
        index
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let index = sample_index();
        index.save(dir.path()).unwrap();

        let loaded = BlockIndex::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.size, 1024);
        assert_eq!(loaded.sector_size, 8);
        assert_eq!(loaded.len(), 2);
        let (saved, reread) = (
            index.get(&Key::from_content(b"a")).unwrap(),
            loaded.get(&Key::from_content(b"a")).unwrap(),
        );
        assert_eq!(reread.sectors, saved.sectors);
        assert_eq!(reread.length, saved.length);
        assert_eq!(reread.update_time, saved.update_time);
        assert_eq!(loaded.used_sector_count(), 3);
        assert!(!dir.path().join(INDEX_TMP_FILE).exists());
    }

    #[test]
    fn test_insert_and_touch_order_accesses() {
        let mut index = BlockIndex::new(1024, 8);
        let a = Key::from_content(b"a");
        let b = Key::from_content(b"b");
        index.insert(a.clone(), ClusterInfo::new(vec![0], 1));
        index.insert(b.clone(), ClusterInfo::new(vec![1], 1));
        assert!(index.get(&a).unwrap().access_seq < index.get(&b).unwrap().access_seq);

        index.touch(&a).unwrap();
        assert!(index.get(&a).unwrap().access_seq > index.get(&b).unwrap().access_seq);
        assert!(index.touch(&Key::from_content(b"c")).is_none());
    }

    #[test]
    fn test_load_orders_by_update_time() {
        let dir = TempDir::new().unwrap();
        let old = Key::from_content(b"old");
        let new = Key::from_content(b"new");

        let mut index = BlockIndex::new(1024, 8);
        let mut stale = ClusterInfo::new(vec![0], 1);
        stale.update_time = stale.update_time - chrono::Duration::seconds(30);
        index.insert(new.clone(), ClusterInfo::new(vec![1], 1));
        index.insert(old.clone(), stale);
        index.save(dir.path()).unwrap();

        let loaded = BlockIndex::load(dir.path()).unwrap().unwrap();
        assert!(loaded.get(&old).unwrap().access_seq < loaded.get(&new).unwrap().access_seq);
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().unwrap();
        assert!(BlockIndex::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_index_discarded() {
        let dir = TempDir::new().unwrap();
        sample_index().save(dir.path()).unwrap();

        let path = dir.path().join(INDEX_FILE);
        let mut raw = std::fs::read(&path).unwrap();
        raw[6] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        assert!(BlockIndex::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_truncated_index_discarded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), [1u8, 2]).unwrap();
        assert!(BlockIndex::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_remove_and_occupied() {
        let mut index = sample_index();
        let removed = index.remove(&Key::from_content(b"a")).unwrap();
        assert_eq!(removed.sectors, vec![0, 1]);
        assert!(index.remove(&Key::from_content(b"a")).is_none());

        let sectors: Vec<u64> = index.occupied_sectors().collect();
        assert_eq!(sectors, vec![2]);
    }
}
