//! Block store internals
//!
//! - [`error`] - Error type shared by every layer
//! - [`key`] - Content-address keys and hash algorithms
//! - [`allocator`] - Sector allocation:
//!   - [`allocator::bitmap`] - Persistent bit-per-sector file with a one-page cache
//!   - [`allocator::free_list`] - Bounded in-memory cache of free sectors
//! - [`io`] - Sector-addressed data file
//! - [`dir_lock`] - Exclusive ownership of the store directory
//! - [`buffer_pool`] - Reusable sector buffers
//! - [`cluster`] - Per-block location records
//! - [`index`] - Persisted key → location index
//! - [`pin`] - Eviction pins
//! - [`config`] - Store configuration
//! - [`stats`] - Usage snapshot and periodic sweep
//! - [`store`] - The block store itself
//! - [`reclaim`] - Free-space recovery and LRU eviction
//!
//! ## On-disk layout
//!
//! ```text
//! <directory>/
//! ├── blocks.dat    data file, capacity / sector_size sectors, grown lazily
//! ├── bitmap.bin    one bit per sector, LSB first, 1 = occupied
//! ├── index.bin     bincode(version, capacity, sector_size, entries) + CRC32
//! └── LOCK          held exclusively while a store is open
//! ```

pub mod allocator;
pub mod buffer_pool;
pub mod cluster;
pub mod config;
pub mod dir_lock;
pub mod error;
pub mod index;
pub mod io;
pub mod key;
pub mod pin;
pub mod reclaim;
pub mod stats;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use key::{HashAlgorithm, Key};
pub use store::{BlockStore, ConsistencyReport};
