//! # blockcache - Disk-Resident Content-Addressed Block Cache
//!
//! `blockcache-rs` keeps variable-length, content-addressed blocks in a
//! bounded local store, the way a peer-to-peer node caches the blocks it
//! fetches and serves:
//!
//! - **Content addressing**: a block is only accepted under the key its bytes
//!   hash to, and is re-verified on every read
//! - **Sector allocation** backed by a persistent bitmap with a single cached
//!   page
//! - **Pinning**: reference-counted locks that protect blocks from eviction
//! - **LRU reclamation** when the store is full
//! - **Self-healing**: blocks that fail to read back are dropped and reported
//!   missing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockcache_rs::{BlockStore, Key, Result, StoreConfig};
//!
//! # fn main() -> Result<()> {
//! let store = BlockStore::open(StoreConfig::new("/var/cache/node"))?;
//!
//! let block = b"hello, world".to_vec();
//! let key = Key::from_content(&block);
//! store.put(&key, &block)?;
//!
//! assert_eq!(store.get(&key)?, block);
//! store.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use blockcache_rs::{BlockStoreBuilder, Key, Result};
//!
//! # fn main() -> Result<()> {
//! let store = BlockStoreBuilder::new()
//!     .directory("/var/cache/node")
//!     .capacity(10 * 1024 * 1024 * 1024)
//!     .without_stats_sweep()
//!     .build()?;
//!
//! let wanted = vec![Key::from_content(b"a"), Key::from_content(b"b")];
//! let missing: Vec<Key> = store.except_from(wanted).collect();
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    buffer_pool::BufferPoolStats,
    config::{StoreConfig, DEFAULT_GROWTH_UNIT, DEFAULT_SECTOR_SIZE, MAX_BLOCK_SIZE, MAX_CAPACITY},
    error::{Result, StoreError},
    key::{HashAlgorithm, Key, MAX_HASH_LENGTH},
    pin::PinGuard,
    stats::StoreStats,
    store::{BlockStore, ConsistencyReport, Keys},
};

use std::path::PathBuf;
use tracing::info;

/// Builder for customizing a [`BlockStore`]
///
/// Provides a fluent API over [`StoreConfig`].
///
/// # Examples
///
/// ```rust,no_run
/// use blockcache_rs::BlockStoreBuilder;
///
/// # fn main() -> blockcache_rs::Result<()> {
/// let store = BlockStoreBuilder::new()
///     .directory("/data/blocks")
///     .capacity(1 << 30)
///     .stats_interval(std::time::Duration::from_secs(60))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct BlockStoreBuilder {
    directory: Option<PathBuf>,
    config: StoreConfig,
}

impl BlockStoreBuilder {
    /// Create a new BlockStoreBuilder with default settings
    pub fn new() -> Self {
        BlockStoreBuilder {
            directory: None,
            config: StoreConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: StoreConfig) -> Self {
        BlockStoreBuilder {
            directory: Some(config.directory.clone()),
            config,
        }
    }

    /// Set the store directory (required)
    pub fn directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Capacity in bytes for a new store
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Data file sector size in bytes
    pub fn sector_size(mut self, sector_size: usize) -> Self {
        self.config.sector_size = sector_size;
        self
    }

    /// Data file growth step and capacity rounding unit
    pub fn growth_unit(mut self, growth_unit: u64) -> Self {
        self.config.growth_unit = growth_unit;
        self
    }

    pub fn free_sector_cache_size(mut self, size: usize) -> Self {
        self.config.free_sector_cache_size = size;
        self
    }

    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.config.buffer_pool_size = size;
        self
    }

    /// Delay before the first statistics sweep
    pub fn stats_initial_delay(mut self, delay: std::time::Duration) -> Self {
        self.config.stats_initial_delay_secs = delay.as_secs();
        self
    }

    /// Interval between statistics sweeps
    pub fn stats_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.stats_interval_secs = interval.as_secs();
        self
    }

    /// Disable the background statistics sweep
    pub fn without_stats_sweep(mut self) -> Self {
        self.config.stats_sweep_enabled = false;
        self
    }

    /// The configuration the builder would open with
    pub fn config(&self) -> Result<StoreConfig> {
        let directory = self.directory.clone().ok_or_else(|| {
            StoreError::Config("directory must be set".to_string())
        })?;
        let config = StoreConfig {
            directory,
            ..self.config.clone()
        };
        config.check()?;
        Ok(config)
    }

    /// Open the store
    pub fn build(self) -> Result<BlockStore> {
        let config = self.config()?;
        info!(
            "Building block store at {} (sector size {}, capacity {})",
            config.directory.display(),
            config.sector_size,
            config.capacity
        );
        BlockStore::open(config)
    }
}

impl Default for BlockStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder() -> Result<()> {
        let temp_dir = tempfile::TempDir::new().unwrap();

        let store = BlockStoreBuilder::new()
            .directory(temp_dir.path().join("blocks"))
            .sector_size(16)
            .growth_unit(64)
            .capacity(100)
            .without_stats_sweep()
            .build()?;

        // Rounded up to whole growth units
        assert_eq!(store.size(), 128);

        let key = Key::from_content(b"builder");
        store.put(&key, b"builder")?;
        assert_eq!(store.get(&key)?, b"builder");

        Ok(())
    }

    #[test]
    fn test_builder_requires_directory() {
        let result = BlockStoreBuilder::new().build();
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_geometry() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = BlockStoreBuilder::new()
            .directory(temp_dir.path())
            .sector_size(10)
            .growth_unit(25)
            .build();
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_builder_stats_settings() -> Result<()> {
        let config = BlockStoreBuilder::new()
            .directory("/tmp/unused")
            .stats_initial_delay(Duration::from_secs(5))
            .stats_interval(Duration::from_secs(30))
            .config()?;

        assert_eq!(config.stats_initial_delay_secs, 5);
        assert_eq!(config.stats_interval_secs, 30);
        assert!(config.stats_sweep_enabled);
        Ok(())
    }

    #[test]
    fn test_from_config() -> Result<()> {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            stats_sweep_enabled: false,
            ..StoreConfig::new(temp_dir.path())
        };

        let store = BlockStoreBuilder::from_config(config).build()?;
        assert_eq!(store.directory(), temp_dir.path());
        assert!(store.is_empty());
        store.close()
    }
}
