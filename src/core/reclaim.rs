//! Space reclamation
//!
//! When the free-sector cache cannot satisfy an allocation the store first
//! rescans the bitmap, and only then evicts unpinned blocks in least recently
//! used order. The first reclamation after open also rebuilds the bitmap from
//! the index, which drops bits leaked by a crash between a bitmap flush and
//! an index checkpoint.

use crate::core::error::{Result, StoreError};
use crate::core::key::Key;
use crate::core::store::StoreInner;
use tracing::{debug, info};

impl StoreInner {
    /// Make at least `needed` sectors available in the free cache
    ///
    /// # Errors
    ///
    /// `SpaceExhausted` if `needed` exceeds the capacity or if evicting every
    /// unpinned block is not enough. Blocks evicted before giving up stay
    /// evicted.
    pub(crate) fn reclaim(&mut self, needed: usize) -> Result<()> {
        let sector_count = self.allocator.sector_count();
        if needed as u64 > sector_count {
            return Err(StoreError::SpaceExhausted {
                needed,
                available: self.allocator.cached_free(),
            });
        }

        if !self.allocator.is_verified() {
            let occupied: Vec<u64> = self
                .index
                .occupied_sectors()
                .filter(|&sector| sector < sector_count)
                .collect();
            info!(
                "Rebuilding sector bitmap from index ({} of {} sectors in use)",
                occupied.len(),
                sector_count
            );
            self.allocator.rebuild(occupied)?;
        }

        self.allocator.refill(needed)?;
        if self.allocator.cached_free() >= needed {
            return Ok(());
        }

        let candidates = self.eviction_candidates();
        let mut evicted = 0;
        for key in candidates {
            self.remove(&key)?;
            evicted += 1;
            if self.allocator.cached_free() >= needed {
                debug!("Evicted {} blocks to free {} sectors", evicted, needed);
                return Ok(());
            }
        }

        self.allocator.cancel_reservation();
        Err(StoreError::SpaceExhausted {
            needed,
            available: self.allocator.cached_free(),
        })
    }

    /// Unpinned keys, least recently used first
    ///
    /// `update_time` only has second resolution, so entries touched within
    /// the same second fall back to their access sequence.
    fn eviction_candidates(&self) -> Vec<Key> {
        let mut candidates: Vec<(&Key, _, u64)> = self
            .index
            .iter()
            .filter(|(key, _)| !self.pins.is_locked(key))
            .map(|(key, cluster)| (key, cluster.update_time, cluster.access_seq))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
        candidates.into_iter().map(|(key, _, _)| key.clone()).collect()
    }
}
