//! Store configuration
//!
//! A [`StoreConfig`] can be built in code, deserialized from TOML, or
//! assembled through [`crate::BlockStoreBuilder`]. It is validated before a
//! store is opened.
//!
//! ```toml
//! directory = "/var/lib/node/cache"
//! capacity = 10737418240
//! stats_interval_secs = 300
//! ```

use crate::core::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Size of one data file sector
pub const DEFAULT_SECTOR_SIZE: usize = 8192;

/// Data file growth step and capacity rounding unit
pub const DEFAULT_GROWTH_UNIT: u64 = 256 * 1024 * 1024;

/// Hard ceiling on a single block
pub const MAX_BLOCK_SIZE: usize = 32 * 1024 * 1024;

/// Absolute capacity ceiling applied on resize (64 TiB)
pub const MAX_CAPACITY: u64 = 64 * 1024 * 1024 * 1024 * 1024;

const DEFAULT_STATS_INITIAL_DELAY_SECS: u64 = 60;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_geometry"))]
pub struct StoreConfig {
    /// Directory holding the data, bitmap and index files
    pub directory: PathBuf,

    /// Capacity in bytes for a new store (a persisted capacity wins on reopen)
    pub capacity: u64,

    /// Data file sector size in bytes
    #[validate(range(min = 1, max = 16777216))]
    pub sector_size: usize,

    /// Data file growth step in bytes; a multiple of `sector_size`
    #[validate(range(min = 1))]
    pub growth_unit: u64,

    /// Cap on the in-memory free-sector cache
    #[validate(range(min = 1))]
    pub free_sector_cache_size: usize,

    /// Idle sector buffers kept for reuse
    #[validate(range(min = 1))]
    pub buffer_pool_size: usize,

    /// Run the background statistics sweep
    pub stats_sweep_enabled: bool,

    /// Delay before the first statistics sweep, in seconds
    pub stats_initial_delay_secs: u64,

    /// Interval between statistics sweeps, in seconds
    #[validate(range(min = 1))]
    pub stats_interval_secs: u64,
}

fn validate_geometry(config: &StoreConfig) -> std::result::Result<(), ValidationError> {
    if config.sector_size == 0 || config.growth_unit % config.sector_size as u64 != 0 {
        return Err(ValidationError::new("growth_unit_not_sector_multiple"));
    }
    if config.capacity > MAX_CAPACITY {
        return Err(ValidationError::new("capacity_exceeds_maximum"));
    }
    Ok(())
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            directory: PathBuf::from("blockcache"),
            capacity: DEFAULT_GROWTH_UNIT,
            sector_size: DEFAULT_SECTOR_SIZE,
            growth_unit: DEFAULT_GROWTH_UNIT,
            free_sector_cache_size: crate::core::allocator::SPACE_SECTOR_COUNT,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            stats_sweep_enabled: true,
            stats_initial_delay_secs: DEFAULT_STATS_INITIAL_DELAY_SECS,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `directory`
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        StoreConfig {
            directory: directory.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read and validate a TOML configuration file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Validate all fields
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn stats_initial_delay(&self) -> Duration {
        Duration::from_secs(self.stats_initial_delay_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Clamp `size` to the ceiling and round it up to a whole growth unit
    pub fn round_capacity(&self, size: u64) -> u64 {
        let size = size.min(MAX_CAPACITY);
        let rounded = (size + self.growth_unit - 1) / self.growth_unit * self.growth_unit;
        // Rounding can cross the ceiling; step back one unit
        if rounded > MAX_CAPACITY {
            rounded - self.growth_unit
        } else {
            rounded
        }
    }
}
