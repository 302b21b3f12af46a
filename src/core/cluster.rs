//! Location records for stored blocks

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Where a block lives in the data file
///
/// `sectors` are in block order: byte `i` of the block is in
/// `sectors[i / sector_size]`. The sectors need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Sector indexes holding the block, in order
    pub sectors: Vec<u64>,

    /// Exact length of the block in bytes
    pub length: u64,

    /// Last read or write, second resolution
    #[serde(with = "chrono::serde::ts_seconds")]
    pub update_time: DateTime<Utc>,

    /// Position in the in-memory access order, stamped by the index
    #[serde(skip)]
    pub access_seq: u64,
}

impl ClusterInfo {
    /// Create a record stamped with the current time
    pub fn new(sectors: Vec<u64>, length: u64) -> Self {
        ClusterInfo {
            sectors,
            length,
            update_time: now(),
            access_seq: 0,
        }
    }

    /// Mark the block as just used
    pub fn touch(&mut self) {
        self.update_time = now();
    }

    /// Bytes of data file the block occupies
    pub fn occupied_bytes(&self, sector_size: usize) -> u64 {
        self.sectors.len() as u64 * sector_size as u64
    }

    /// True if every sector lies below `sector_count`
    pub fn fits_within(&self, sector_count: u64) -> bool {
        self.sectors.iter().all(|&sector| sector < sector_count)
    }
}

/// Number of sectors needed for `length` bytes
pub fn sectors_for(length: u64, sector_size: usize) -> usize {
    ((length + sector_size as u64 - 1) / sector_size as u64) as usize
}

/// Current UTC time truncated to whole seconds
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sectors_for() {
        assert_eq!(sectors_for(0, 8), 0);
        assert_eq!(sectors_for(1, 8), 1);
        assert_eq!(sectors_for(8, 8), 1);
        assert_eq!(sectors_for(10, 8), 2);
        assert_eq!(sectors_for(32 * 1024 * 1024, 8192), 4096);
    }

    #[test]
    fn test_fits_within() {
        let cluster = ClusterInfo::new(vec![0, 5, 3], 20);
        assert!(cluster.fits_within(6));
        assert!(!cluster.fits_within(5));
        assert_eq!(cluster.occupied_bytes(8), 24);
    }

    #[test]
    fn test_timestamp_round_trip_keeps_seconds() {
        let cluster = ClusterInfo::new(vec![1, 2], 12);
        let bytes = bincode::serialize(&cluster).unwrap();
        let decoded: ClusterInfo = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, cluster);
        assert_eq!(decoded.update_time.timestamp_subsec_nanos(), 0);
    }
}
