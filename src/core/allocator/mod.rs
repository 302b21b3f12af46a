//! Sector allocation for the block store
//!
//! Two layers:
//! - [`bitmap::BitmapFile`] is the durable occupancy table (one bit per sector)
//! - [`free_list::FreeSectorCache`] is an in-memory, bounded set of sectors
//!   known to be free, refilled by scanning the bitmap
//!
//! [`SectorAllocator`] keeps the two in step: every claimed sector is set in
//! the bitmap and every released sector is cleared.

pub mod bitmap;
pub mod free_list;

use crate::core::error::{Result, StoreError};
use bitmap::BitmapFile;
use free_list::FreeSectorCache;
use std::path::Path;

/// Default cap on the number of cached free sectors
pub const SPACE_SECTOR_COUNT: usize = 4096;

/// Bitmap-backed allocator with a free-sector cache in front
pub struct SectorAllocator {
    bitmap: BitmapFile,
    free: FreeSectorCache,

    /// Bitmap has been rebuilt from the index since open
    verified: bool,
}

impl SectorAllocator {
    /// Open the bitmap at `path` and size it to `sector_count` bits
    pub fn open<P: AsRef<Path>>(path: P, sector_count: u64, cache_size: usize) -> Result<Self> {
        let mut bitmap = BitmapFile::open(path)?;
        if bitmap.length() != sector_count {
            bitmap.set_length(sector_count)?;
        }

        Ok(SectorAllocator {
            bitmap,
            free: FreeSectorCache::new(cache_size),
            verified: false,
        })
    }

    /// Number of sectors tracked
    pub fn sector_count(&self) -> u64 {
        self.bitmap.length()
    }

    /// Number of sectors currently cached as free
    pub fn cached_free(&self) -> usize {
        self.free.count()
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Reset the bitmap to exactly the given occupied sectors
    ///
    /// Used once per open to repair a bitmap that is stale relative to the
    /// index. The free cache is dropped and refilled by the next scan.
    pub fn rebuild<I: IntoIterator<Item = u64>>(&mut self, occupied: I) -> Result<()> {
        self.bitmap.clear_all()?;
        for sector in occupied {
            self.bitmap.set(sector, true)?;
        }
        self.bitmap.flush()?;
        self.free.clear();
        self.verified = true;
        Ok(())
    }

    /// Rescan the bitmap if fewer than `target` free sectors are cached
    pub fn refill(&mut self, target: usize) -> Result<()> {
        if self.free.count() >= target {
            return Ok(());
        }
        self.free.reserve(target);
        let points = self.bitmap.get_free_points(self.free.limit())?;
        tracing::debug!("Free sector scan found {} sectors", points.len());
        self.free.replace(points);
        Ok(())
    }

    /// Drop room reserved by `refill` for a request that will not be claimed
    pub fn cancel_reservation(&mut self) {
        self.free.cancel_reservation();
    }

    /// Take `count` sectors from the free cache and mark them occupied
    pub fn claim(&mut self, count: usize) -> Result<Vec<u64>> {
        let sectors = self.free.take(count).ok_or(StoreError::SpaceExhausted {
            needed: count,
            available: self.free.count(),
        })?;

        for (i, &sector) in sectors.iter().enumerate() {
            if let Err(e) = self.bitmap.set(sector, true) {
                // Undo the bits already set; the rest go back to the cache untouched
                for &done in &sectors[..i] {
                    let _ = self.bitmap.set(done, false);
                }
                for &sector in &sectors {
                    self.free.insert(sector);
                }
                return Err(e);
            }
        }

        Ok(sectors)
    }

    /// Clear the bits for `sectors` and offer them back to the free cache
    pub fn release(&mut self, sectors: &[u64]) -> Result<()> {
        for &sector in sectors {
            if sector >= self.bitmap.length() {
                continue;
            }
            self.bitmap.set(sector, false)?;
            self.free.insert(sector);
        }
        Ok(())
    }

    /// Change the number of tracked sectors and invalidate the free cache
    pub fn resize(&mut self, sector_count: u64) -> Result<()> {
        self.bitmap.set_length(sector_count)?;
        self.free.clear();
        Ok(())
    }

    pub fn is_occupied(&mut self, sector: u64) -> Result<bool> {
        self.bitmap.get(sector)
    }

    /// Every sector whose bit is set
    pub fn occupied_sectors(&mut self) -> Result<Vec<u64>> {
        self.bitmap.occupied_points()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.bitmap.flush()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.bitmap.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn allocator(dir: &TempDir, sectors: u64, cache: usize) -> SectorAllocator {
        SectorAllocator::open(dir.path().join("bitmap.bin"), sectors, cache).unwrap()
    }

    #[test]
    fn test_claim_requires_refill() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, 8, 16);

        assert!(matches!(
            alloc.claim(1),
            Err(StoreError::SpaceExhausted { needed: 1, available: 0 })
        ));

        alloc.refill(1).unwrap();
        assert_eq!(alloc.cached_free(), 8);

        let sectors = alloc.claim(3).unwrap();
        assert_eq!(sectors, vec![0, 1, 2]);
        for &sector in &sectors {
            assert!(alloc.is_occupied(sector).unwrap());
        }
        assert_eq!(alloc.cached_free(), 5);
    }

    #[test]
    fn test_release_returns_sectors() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, 4, 16);

        alloc.refill(4).unwrap();
        let sectors = alloc.claim(4).unwrap();
        assert_eq!(alloc.cached_free(), 0);

        alloc.release(&sectors[1..3]).unwrap();
        assert_eq!(alloc.cached_free(), 2);
        assert!(!alloc.is_occupied(1).unwrap());
        assert!(alloc.is_occupied(0).unwrap());
        assert_eq!(alloc.occupied_sectors().unwrap(), vec![0, 3]);
    }

    #[test]
    fn test_large_request_does_not_raise_cap() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, 100, 4);

        alloc.refill(2).unwrap();
        assert_eq!(alloc.cached_free(), 4);

        alloc.refill(50).unwrap();
        assert_eq!(alloc.cached_free(), 50);
        let sectors = alloc.claim(50).unwrap();
        assert_eq!(sectors.len(), 50);

        // Released sectors only refill the cache up to the configured cap
        alloc.release(&sectors).unwrap();
        assert_eq!(alloc.cached_free(), 4);
    }

    #[test]
    fn test_reserved_room_filled_by_release() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, 10, 2);

        alloc.refill(10).unwrap();
        let sectors = alloc.claim(10).unwrap();

        // Reserve for a request that needs everything back
        alloc.refill(6).unwrap();
        assert_eq!(alloc.cached_free(), 0);
        alloc.release(&sectors[..6]).unwrap();
        assert_eq!(alloc.cached_free(), 6);

        alloc.cancel_reservation();
        alloc.release(&sectors[6..]).unwrap();
        assert_eq!(alloc.cached_free(), 6);
    }

    #[test]
    fn test_rebuild_matches_given_sectors() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, 32, 64);

        alloc.refill(32).unwrap();
        alloc.claim(20).unwrap();
        assert!(!alloc.is_verified());

        alloc.rebuild([4, 9, 31]).unwrap();
        assert!(alloc.is_verified());
        assert_eq!(alloc.cached_free(), 0);
        assert_eq!(alloc.occupied_sectors().unwrap(), vec![4, 9, 31]);
    }

    #[test]
    fn test_resize_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let mut alloc = allocator(&dir, 16, 64);

        alloc.refill(16).unwrap();
        alloc.resize(8).unwrap();
        assert_eq!(alloc.cached_free(), 0);
        assert_eq!(alloc.sector_count(), 8);

        alloc.refill(1).unwrap();
        assert_eq!(alloc.cached_free(), 8);
    }
}
