//! Reference-counted pins protecting keys from eviction
//!
//! Pins are a run-time concept only: the table is never persisted and starts
//! empty on every open.

use crate::core::error::{Result, StoreError};
use crate::core::key::Key;
use crate::core::store::BlockStore;
use ahash::AHashMap;

#[derive(Debug, Default)]
pub struct PinTable {
    counts: AHashMap<Key, u32>,
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the pin count for `key`
    pub fn lock(&mut self, key: &Key) {
        *self.counts.entry(key.clone()).or_insert(0) += 1;
    }

    /// Decrement the pin count for `key`
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key is not pinned.
    pub fn unlock(&mut self, key: &Key) -> Result<()> {
        match self.counts.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                self.counts.remove(key);
                Ok(())
            }
            None => Err(StoreError::KeyNotFound(key.clone())),
        }
    }

    pub fn is_locked(&self, key: &Key) -> bool {
        self.counts.contains_key(key)
    }

    pub fn count(&self, key: &Key) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.counts.keys()
    }
}

/// Pin held until dropped; see [`BlockStore::pin`]
#[must_use = "the pin is released as soon as the guard is dropped"]
pub struct PinGuard<'a> {
    store: &'a BlockStore,
    key: Key,
}

impl<'a> PinGuard<'a> {
    pub(crate) fn new(store: &'a BlockStore, key: Key) -> Self {
        PinGuard { store, key }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.unlock(&self.key) {
            tracing::warn!("Pin on {} was already released: {}", self.key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock_counts() {
        let mut pins = PinTable::new();
        let key = Key::from_content(b"pinned");

        pins.lock(&key);
        pins.lock(&key);
        assert_eq!(pins.count(&key), 2);
        assert!(pins.is_locked(&key));

        pins.unlock(&key).unwrap();
        assert!(pins.is_locked(&key));
        pins.unlock(&key).unwrap();
        assert!(!pins.is_locked(&key));
        assert_eq!(pins.keys().count(), 0);
    }

    #[test]
    fn test_unlock_without_lock() {
        let mut pins = PinTable::new();
        let key = Key::from_content(b"never");
        assert!(matches!(pins.unlock(&key), Err(StoreError::KeyNotFound(_))));
    }
}
