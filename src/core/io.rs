//! Disk I/O for the sector data file

use crate::core::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Sector-addressed data file
///
/// The file carries no header; sector `n` starts at byte `n * sector_size`.
pub struct DataFile {
    file: File,
    path: PathBuf,
    sector_size: usize,
    len: u64,
}

impl DataFile {
    /// Open (or create) a data file
    pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(DataFile {
            file,
            path: path.as_ref().to_path_buf(),
            sector_size,
            len,
        })
    }

    /// Current file length in bytes
    pub fn byte_len(&self) -> u64 {
        self.len
    }

    /// Grow or truncate the file
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    /// Fill `buf` from the start of `sector`
    ///
    /// `buf` may be shorter than a sector (the tail of a block). Reading past
    /// the end of the file is an `UnexpectedEof` I/O error.
    pub fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert!(buf.len() <= self.sector_size);
        let offset = sector * self.sector_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Write a full sector
    pub fn write_sector(&mut self, sector: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.sector_size);
        let offset = sector * self.sector_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_sector() {
        let dir = TempDir::new().unwrap();
        let mut file = DataFile::open(dir.path().join("blocks.dat"), 16).unwrap();
        file.set_len(64).unwrap();

        let mut data = vec![0u8; 16];
        data[..5].copy_from_slice(b"Hello");
        file.write_sector(2, &data).unwrap();

        let mut back = vec![0u8; 5];
        file.read_sector(2, &mut back).unwrap();
        assert_eq!(&back, b"Hello");

        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(&raw[32..37], b"Hello");
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let mut file = DataFile::open(dir.path().join("blocks.dat"), 16).unwrap();
        file.set_len(32).unwrap();

        let mut buf = vec![0u8; 16];
        assert!(file.read_sector(1, &mut buf).is_ok());
        assert!(file.read_sector(2, &mut buf).is_err());
    }

    #[test]
    fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let mut file = DataFile::open(dir.path().join("blocks.dat"), 16).unwrap();
        file.write_sector(3, &[7u8; 16]).unwrap();
        assert_eq!(file.byte_len(), 64);

        file.set_len(16).unwrap();
        assert_eq!(file.byte_len(), 16);
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 16);
    }

    #[test]
    fn test_open_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.dat");
        {
            let mut file = DataFile::open(&path, 8).unwrap();
            file.write_sector(0, b"persist!").unwrap();
            file.sync().unwrap();
        }

        let mut file = DataFile::open(&path, 8).unwrap();
        assert_eq!(file.byte_len(), 8);
        let mut buf = [0u8; 8];
        file.read_sector(0, &mut buf).unwrap();
        assert_eq!(&buf, b"persist!");
    }
}
