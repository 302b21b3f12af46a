//! Content-addressed block store
//!
//! A [`BlockStore`] maps [`Key`]s to variable-length blocks kept in a single
//! sector-divided data file. All state sits behind one mutex, so every public
//! operation observes a single total order.
//!
//! ```text
//! put(key, bytes)                       get(key)
//!   ├─ size + digest check                ├─ index lookup, refresh update_time
//!   ├─ existing key → no-op               ├─ read sectors in order
//!   ├─ reclaim space if short             ├─ verify digest
//!   ├─ claim sectors (bitmap bits set)    └─ any failure → remove + BlockNotFound
//!   ├─ write sectors, flush
//!   └─ insert ClusterInfo
//! ```

use crate::core::allocator::SectorAllocator;
use crate::core::buffer_pool::{BufferPool, BufferPoolStats};
use crate::core::cluster::{sectors_for, ClusterInfo};
use crate::core::config::{StoreConfig, MAX_BLOCK_SIZE};
use crate::core::dir_lock::DirLock;
use crate::core::error::{Result, StoreError};
use crate::core::index::BlockIndex;
use crate::core::io::DataFile;
use crate::core::key::Key;
use crate::core::pin::{PinGuard, PinTable};
use crate::core::stats::{StatsSweeper, StoreStats};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

pub const DATA_FILE: &str = "blocks.dat";
pub const BITMAP_FILE: &str = "bitmap.bin";

/// Everything guarded by the store lock
pub(crate) struct StoreInner {
    pub(crate) directory: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) index: BlockIndex,
    pub(crate) pins: PinTable,
    pub(crate) allocator: SectorAllocator,
    pub(crate) data: DataFile,
    pub(crate) pool: Arc<BufferPool>,
    // Dropped last, after the files it guards
    _dir_lock: DirLock,
}

impl StoreInner {
    fn open(config: StoreConfig) -> Result<Self> {
        let directory = config.directory.clone();
        std::fs::create_dir_all(&directory)?;
        let dir_lock = DirLock::acquire(&directory)?;

        let sector_size = config.sector_size as u64;
        let index = match BlockIndex::load(&directory)? {
            Some(index) if index.sector_size != sector_size => {
                return Err(StoreError::Config(format!(
                    "store at {} was written with {} byte sectors, configured {}",
                    directory.display(),
                    index.sector_size,
                    sector_size
                )));
            }
            Some(index) => index,
            None => BlockIndex::new(config.round_capacity(config.capacity), sector_size),
        };

        let allocator = SectorAllocator::open(
            directory.join(BITMAP_FILE),
            index.size / sector_size,
            config.free_sector_cache_size,
        )?;

        let mut data = DataFile::open(directory.join(DATA_FILE), config.sector_size)?;
        if data.byte_len() > index.size {
            data.set_len(index.size)?;
        }

        let pool = BufferPool::new(config.sector_size, config.buffer_pool_size);

        Ok(StoreInner {
            directory,
            config,
            index,
            pins: PinTable::new(),
            allocator,
            data,
            pool,
            _dir_lock: dir_lock,
        })
    }

    fn sector_size(&self) -> usize {
        self.config.sector_size
    }

    pub(crate) fn put(&mut self, key: &Key, data: &[u8]) -> Result<()> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(StoreError::BadBlock(format!(
                "block of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_BLOCK_SIZE
            )));
        }
        if !key.matches(data) {
            return Err(StoreError::BadBlock(format!(
                "content does not hash to {}",
                key
            )));
        }
        if self.index.contains(key) {
            return Ok(());
        }

        let needed = sectors_for(data.len() as u64, self.sector_size());
        if self.allocator.cached_free() < needed {
            self.reclaim(needed)?;
        }

        let sectors = self.allocator.claim(needed)?;
        if let Err(e) = self.write_sectors(&sectors, data) {
            if let Err(rollback) = self.allocator.release(&sectors) {
                error!("Failed to roll back sectors for {}: {}", key, rollback);
            }
            return Err(e);
        }

        debug!("Stored {} ({} bytes in {} sectors)", key, data.len(), sectors.len());
        self.index
            .insert(key.clone(), ClusterInfo::new(sectors, data.len() as u64));
        Ok(())
    }

    fn write_sectors(&mut self, sectors: &[u64], data: &[u8]) -> Result<()> {
        if let Some(&last) = sectors.iter().max() {
            self.ensure_data_len(last + 1)?;
        }

        let sector_size = self.sector_size();
        let mut buf = self.pool.take(sector_size);
        for (&sector, chunk) in sectors.iter().zip(data.chunks(sector_size)) {
            buf[..chunk.len()].copy_from_slice(chunk);
            buf[chunk.len()..].fill(0);
            self.data.write_sector(sector, &buf)?;
        }
        self.data.flush()
    }

    /// Grow the data file in whole growth units until it holds `sector_count` sectors
    fn ensure_data_len(&mut self, sector_count: u64) -> Result<()> {
        let required = sector_count * self.sector_size() as u64;
        if self.data.byte_len() >= required {
            return Ok(());
        }

        let unit = self.config.growth_unit;
        let target = ((required + unit - 1) / unit * unit)
            .min(self.index.size)
            .max(required);
        debug!(
            "Growing {}: {} -> {} bytes",
            self.data.path().display(),
            self.data.byte_len(),
            target
        );
        self.data.set_len(target)
    }

    pub(crate) fn get(&mut self, key: &Key) -> Result<Vec<u8>> {
        let cluster = match self.index.touch(key) {
            Some(cluster) => cluster.clone(),
            None => return Err(StoreError::BlockNotFound(key.clone())),
        };

        match self.read_cluster(&cluster) {
            Ok(data) if key.matches(&data) => Ok(data),
            Ok(_) => {
                warn!("Block {} failed digest verification, removing", key);
                self.discard(key)
            }
            Err(e) => {
                warn!("Block {} is unreadable ({}), removing", key, e);
                self.discard(key)
            }
        }
    }

    /// Drop a damaged entry and report it as missing
    fn discard(&mut self, key: &Key) -> Result<Vec<u8>> {
        if let Err(e) = self.remove(key) {
            error!("Failed to release sectors of damaged block {}: {}", key, e);
        }
        Err(StoreError::BlockNotFound(key.clone()))
    }

    fn read_cluster(&mut self, cluster: &ClusterInfo) -> Result<Vec<u8>> {
        let sector_size = self.sector_size();
        if cluster.length > MAX_BLOCK_SIZE as u64
            || cluster.sectors.len() != sectors_for(cluster.length, sector_size)
        {
            return Err(StoreError::Format(format!(
                "cluster of {} bytes has {} sectors",
                cluster.length,
                cluster.sectors.len()
            )));
        }

        let sector_count = self.allocator.sector_count();
        let mut data = vec![0u8; cluster.length as usize];
        for (&sector, chunk) in cluster.sectors.iter().zip(data.chunks_mut(sector_size)) {
            if sector >= sector_count {
                return Err(StoreError::SectorOutOfRange {
                    sector,
                    length: sector_count,
                });
            }
            self.data.read_sector(sector, chunk)?;
        }
        Ok(data)
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Result<()> {
        if let Some(cluster) = self.index.remove(key) {
            debug!("Removed {} ({} sectors)", key, cluster.sectors.len());
            self.allocator.release(&cluster.sectors)?;
        }
        Ok(())
    }

    pub(crate) fn resize(&mut self, size: u64) -> Result<()> {
        let size = self.config.round_capacity(size);
        let sector_count = size / self.sector_size() as u64;

        let out_of_bounds: Vec<Key> = self
            .index
            .iter()
            .filter(|(_, cluster)| !cluster.fits_within(sector_count))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &out_of_bounds {
            self.remove(key)?;
        }

        let old_size = self.index.size;
        self.index.size = size;
        if self.data.byte_len() > size {
            self.data.set_len(size)?;
        }
        self.allocator.resize(sector_count)?;

        info!(
            "Resized block store: {} -> {} bytes ({} blocks dropped)",
            old_size,
            size,
            out_of_bounds.len()
        );
        Ok(())
    }

    pub(crate) fn save(&mut self) -> Result<()> {
        self.data.flush()?;
        self.data.sync()?;
        self.allocator.sync()?;
        self.index.save(&self.directory)?;
        debug!("Saved index with {} blocks", self.index.len());
        Ok(())
    }

    pub(crate) fn used_size(&self) -> u64 {
        self.index.used_sector_count() * self.sector_size() as u64
    }

    pub(crate) fn compute_stats(&self) -> StoreStats {
        let sector_size = self.sector_size();
        let used_size = self.used_size();

        let mut pinned_size = 0;
        let mut pinned_count = 0;
        for key in self.pins.keys() {
            if let Some(cluster) = self.index.get(key) {
                pinned_size += cluster.occupied_bytes(sector_size);
                pinned_count += 1;
            }
        }

        StoreStats {
            capacity: self.index.size,
            used_size,
            free_size: self.index.size.saturating_sub(used_size),
            pinned_size,
            block_count: self.index.len(),
            pinned_count,
            swept_at: Some(crate::core::cluster::now()),
        }
    }

    pub(crate) fn check_consistency(&mut self) -> Result<ConsistencyReport> {
        let sector_count = self.allocator.sector_count();
        let mut owners: BTreeMap<u64, usize> = BTreeMap::new();
        for sector in self.index.occupied_sectors() {
            *owners.entry(sector).or_insert(0) += 1;
        }

        let occupied = self.allocator.occupied_sectors()?;
        let mut report = ConsistencyReport::default();

        for (&sector, &count) in &owners {
            if count > 1 {
                report.shared_sectors.push(sector);
            }
            if sector >= sector_count {
                report.out_of_range.push(sector);
            } else if !self.allocator.is_occupied(sector)? {
                report.unmarked_sectors.push(sector);
            }
        }
        for sector in occupied {
            if !owners.contains_key(&sector) {
                report.orphan_sectors.push(sector);
            }
        }

        Ok(report)
    }
}

/// Result of comparing the bitmap with the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Sectors owned by more than one block
    pub shared_sectors: Vec<u64>,
    /// Indexed sectors whose bitmap bit is clear
    pub unmarked_sectors: Vec<u64>,
    /// Set bitmap bits that no block owns
    pub orphan_sectors: Vec<u64>,
    /// Indexed sectors beyond the capacity
    pub out_of_range: Vec<u64>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.shared_sectors.is_empty()
            && self.unmarked_sectors.is_empty()
            && self.orphan_sectors.is_empty()
            && self.out_of_range.is_empty()
    }
}

struct Shared {
    inner: Mutex<StoreInner>,
    stats: RwLock<StoreStats>,
}

impl Shared {
    fn refresh_stats(&self) -> StoreStats {
        let stats = self.inner.lock().compute_stats();
        *self.stats.write() = stats;
        stats
    }
}

/// Disk-resident content-addressed block cache
///
/// # Examples
///
/// ```rust,no_run
/// use blockcache_rs::{BlockStore, Key, StoreConfig};
///
/// # fn main() -> blockcache_rs::Result<()> {
/// let store = BlockStore::open(StoreConfig::new("/var/cache/node"))?;
///
/// let block = b"some block".to_vec();
/// let key = Key::from_content(&block);
/// store.put(&key, &block)?;
/// assert_eq!(store.get(&key)?, block);
/// # Ok(())
/// # }
/// ```
pub struct BlockStore {
    shared: Arc<Shared>,
    sweeper: Option<StatsSweeper>,
    closed: bool,
}

impl BlockStore {
    /// Open (or create) a store described by `config`
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.check()?;

        let sweep_enabled = config.stats_sweep_enabled;
        let initial_delay = config.stats_initial_delay();
        let interval = config.stats_interval();

        let inner = StoreInner::open(config)?;
        info!(
            "Opened block store at {} ({} blocks, capacity {} bytes)",
            inner.directory.display(),
            inner.index.len(),
            inner.index.size
        );

        let stats = inner.compute_stats();
        let shared = Arc::new(Shared {
            inner: Mutex::new(inner),
            stats: RwLock::new(stats),
        });

        let sweeper = if sweep_enabled {
            let weak: Weak<Shared> = Arc::downgrade(&shared);
            Some(StatsSweeper::start(initial_delay, interval, move || {
                match weak.upgrade() {
                    Some(shared) => {
                        let swept = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            shared.refresh_stats()
                        }));
                        if swept.is_err() {
                            error!("Statistics sweep failed; keeping previous snapshot");
                        }
                        true
                    }
                    None => false,
                }
            })?)
        } else {
            None
        };

        Ok(BlockStore {
            shared,
            sweeper,
            closed: false,
        })
    }

    /// Store `data` under `key`
    ///
    /// A key that is already present is left untouched.
    ///
    /// # Errors
    ///
    /// - `BadBlock` if `data` is larger than 32 MiB or does not hash to `key`
    /// - `SpaceExhausted` if evicting every unpinned block still leaves too
    ///   few free sectors
    pub fn put(&self, key: &Key, data: &[u8]) -> Result<()> {
        self.shared.inner.lock().put(key, data)
    }

    /// Read the block stored under `key`
    ///
    /// A block that cannot be read back intact is removed and reported as
    /// `BlockNotFound`, the same as a key that was never stored.
    pub fn get(&self, key: &Key) -> Result<Vec<u8>> {
        self.shared.inner.lock().get(key)
    }

    /// Remove `key`; a no-op if it is absent
    pub fn remove(&self, key: &Key) -> Result<()> {
        self.shared.inner.lock().remove(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.shared.inner.lock().index.contains(key)
    }

    /// Length in bytes of the block stored under `key`
    pub fn get_length(&self, key: &Key) -> Result<u64> {
        self.shared
            .inner
            .lock()
            .index
            .get(key)
            .map(|cluster| cluster.length)
            .ok_or_else(|| StoreError::KeyNotFound(key.clone()))
    }

    /// Pin `key` against eviction; the key need not be stored yet
    pub fn lock(&self, key: &Key) {
        self.shared.inner.lock().pins.lock(key);
    }

    /// Release one pin on `key`
    pub fn unlock(&self, key: &Key) -> Result<()> {
        self.shared.inner.lock().pins.unlock(key)
    }

    /// Pin `key` for the lifetime of the returned guard
    pub fn pin(&self, key: &Key) -> PinGuard<'_> {
        self.lock(key);
        PinGuard::new(self, key.clone())
    }

    pub fn is_locked(&self, key: &Key) -> bool {
        self.shared.inner.lock().pins.is_locked(key)
    }

    /// Change the capacity
    ///
    /// The size is clamped to 64 TiB and rounded up to the growth unit.
    /// Blocks with any sector past the new bound are dropped, pinned or not.
    pub fn resize(&self, size: u64) -> Result<()> {
        self.shared.inner.lock().resize(size)
    }

    /// Capacity in bytes
    pub fn size(&self) -> u64 {
        self.shared.inner.lock().index.size
    }

    /// Bytes of sectors referenced by stored blocks
    pub fn used_size(&self) -> u64 {
        self.shared.inner.lock().used_size()
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.shared.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.lock().index.is_empty()
    }

    /// Snapshot of every stored key
    pub fn keys(&self) -> Vec<Key> {
        self.shared.inner.lock().index.keys().cloned().collect()
    }

    /// Iterate over the stored keys as of this call
    pub fn iter(&self) -> Keys {
        Keys {
            inner: self.keys().into_iter(),
        }
    }

    /// Lazily keep the keys from `keys` that are stored locally
    pub fn intersect_from<'a, I>(&'a self, keys: I) -> impl Iterator<Item = Key> + 'a
    where
        I: IntoIterator<Item = Key> + 'a,
        I::IntoIter: 'a,
    {
        keys.into_iter().filter(move |key| self.contains(key))
    }

    /// Lazily keep the keys from `keys` that are not stored locally
    pub fn except_from<'a, I>(&'a self, keys: I) -> impl Iterator<Item = Key> + 'a
    where
        I: IntoIterator<Item = Key> + 'a,
        I::IntoIter: 'a,
    {
        keys.into_iter().filter(move |key| !self.contains(key))
    }

    /// Last statistics snapshot taken by the sweep
    pub fn stats(&self) -> StoreStats {
        *self.shared.stats.read()
    }

    /// Recompute statistics now
    pub fn refresh_stats(&self) -> StoreStats {
        self.shared.refresh_stats()
    }

    pub fn buffer_pool_stats(&self) -> BufferPoolStats {
        self.shared.inner.lock().pool.stats()
    }

    /// Compare the bitmap against the index
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.shared.inner.lock().check_consistency()
    }

    /// Checkpoint the index and flush the bitmap and data files
    pub fn save(&self) -> Result<()> {
        self.shared.inner.lock().save()
    }

    pub fn directory(&self) -> PathBuf {
        self.shared.inner.lock().directory.clone()
    }

    /// Stop the statistics sweep and checkpoint
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        self.closed = true;
        self.save()
    }

    #[cfg(test)]
    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut StoreInner) -> R) -> R {
        f(&mut self.shared.inner.lock())
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!("Failed to save block store on drop: {}", e);
        }
    }
}

/// Iterator over a snapshot of stored keys
pub struct Keys {
    inner: std::vec::IntoIter<Key>,
}

impl Iterator for Keys {
    type Item = Key;

    fn next(&mut self) -> Option<Key> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> IntoIterator for &'a BlockStore {
    type Item = Key;
    type IntoIter = Keys;

    fn into_iter(self) -> Keys {
        self.iter()
    }
}
