//! Bounded cache of known-free sectors
//!
//! Seeded from bitmap scans and topped up as blocks are removed. The cache
//! is a hint, not the source of truth: a sector that does not fit under the
//! cap is simply dropped and rediscovered by the next scan.
//!
//! A request larger than the cap may reserve room for itself. The reservation
//! lasts until the next successful `take`, after which the configured cap
//! applies again.

use std::collections::BTreeSet;

/// Sorted, capacity-bounded set of free sector indexes
#[derive(Debug, Clone)]
pub struct FreeSectorCache {
    sectors: BTreeSet<u64>,
    capacity: usize,
    /// Room reserved for one pending request
    reserved: usize,
}

impl FreeSectorCache {
    pub fn new(capacity: usize) -> Self {
        FreeSectorCache {
            sectors: BTreeSet::new(),
            capacity,
            reserved: 0,
        }
    }

    /// Number of cached sectors
    pub fn count(&self) -> usize {
        self.sectors.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current bound on cached sectors
    pub fn limit(&self) -> usize {
        self.capacity.max(self.reserved)
    }

    /// Allow up to `count` sectors until the next successful `take`
    pub fn reserve(&mut self, count: usize) {
        self.reserved = count;
    }

    pub fn cancel_reservation(&mut self) {
        self.reserved = 0;
    }

    /// Cache a free sector; returns false when the cache is full
    pub fn insert(&mut self, sector: u64) -> bool {
        if self.sectors.contains(&sector) {
            return true;
        }
        if self.sectors.len() >= self.limit() {
            return false;
        }
        self.sectors.insert(sector)
    }

    /// Replace the contents with the result of a fresh scan
    pub fn replace<I: IntoIterator<Item = u64>>(&mut self, sectors: I) {
        let limit = self.limit();
        self.sectors.clear();
        self.sectors.extend(sectors.into_iter().take(limit));
    }

    /// Remove and return the `count` lowest sectors, or `None` if fewer are cached
    pub fn take(&mut self, count: usize) -> Option<Vec<u64>> {
        if count > self.sectors.len() {
            return None;
        }
        let mut taken = Vec::with_capacity(count);
        for _ in 0..count {
            taken.extend(self.sectors.pop_first());
        }
        self.reserved = 0;
        Some(taken)
    }

    pub fn clear(&mut self) {
        self.sectors.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.sectors.iter().copied()
    }
}
