//! Persistent bit-per-sector occupancy table
//!
//! The bitmap lives in its own file with no header: bit `n` of the table is
//! bit `n % 8` (least significant first) of byte `n / 8`. Only one
//! [`BITMAP_PAGE_SIZE`] page is held in memory at a time. Writes go to the
//! cached page and reach the file when the page is switched out or on
//! [`BitmapFile::flush`].

use crate::core::error::{Result, StoreError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size of one cached bitmap page in bytes
pub const BITMAP_PAGE_SIZE: usize = 4096;

/// Number of sector bits covered by one page
const BITS_PER_PAGE: u64 = (BITMAP_PAGE_SIZE * 8) as u64;

/// Disk-backed bitmap with a single write-back page cache
pub struct BitmapFile {
    file: File,
    path: PathBuf,

    /// Logical length in bits
    length: u64,

    /// Page currently held in `cache`
    cache_sector: Option<u64>,

    cache: Vec<u8>,

    /// Cached page differs from the file
    dirty: bool,
}

impl BitmapFile {
    /// Open (or create) a bitmap file
    ///
    /// The logical length is taken from the file size; callers set the exact
    /// bit length with [`BitmapFile::set_length`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let length = file.metadata()?.len() * 8;

        Ok(BitmapFile {
            file,
            path: path.as_ref().to_path_buf(),
            length,
            cache_sector: None,
            cache: vec![0u8; BITMAP_PAGE_SIZE],
            dirty: false,
        })
    }

    /// Logical capacity in bits
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resize the backing file to `ceil(bits / 8)` bytes
    ///
    /// Bits past the new length inside the last byte are cleared so a later
    /// grow does not resurrect them.
    pub fn set_length(&mut self, bits: u64) -> Result<()> {
        self.flush()?;

        let old_length = self.length;
        self.file.set_len(byte_len(bits))?;
        self.length = bits;
        self.cache_sector = None;

        let tail_end = old_length.min(byte_len(bits) * 8);
        for point in bits..tail_end {
            self.write_bit(point, false)?;
        }
        self.flush()
    }

    /// Reset every bit to zero without changing the length
    pub fn clear_all(&mut self) -> Result<()> {
        self.cache_sector = None;
        self.dirty = false;
        self.file.set_len(0)?;
        self.file.set_len(byte_len(self.length))?;
        Ok(())
    }

    /// Read the bit for `point`
    pub fn get(&mut self, point: u64) -> Result<bool> {
        self.check_range(point)?;
        let (page, byte_offset, bit_offset) = locate(point);
        self.load_page(page)?;
        Ok(self.cache[byte_offset] & (1 << bit_offset) != 0)
    }

    /// Set or clear the bit for `point`
    pub fn set(&mut self, point: u64, value: bool) -> Result<()> {
        self.check_range(point)?;
        self.write_bit(point, value)
    }

    /// Write the cached page back if it is dirty
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(page) = self.cache_sector {
            let offset = page * BITMAP_PAGE_SIZE as u64;
            let n = byte_len(self.length).saturating_sub(offset).min(BITMAP_PAGE_SIZE as u64) as usize;
            if n > 0 {
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.write_all(&self.cache[..n])?;
                self.file.flush()?;
            }
        }

        self.dirty = false;
        Ok(())
    }

    /// Flush and fsync the bitmap file
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Collect up to `count` unset bits, scanning upward from bit 0
    pub fn get_free_points(&mut self, count: usize) -> Result<Vec<u64>> {
        self.scan(false, count)
    }

    /// Collect every set bit
    pub fn occupied_points(&mut self) -> Result<Vec<u64>> {
        self.scan(true, usize::MAX)
    }

    fn scan(&mut self, want_set: bool, limit: usize) -> Result<Vec<u64>> {
        let mut points = Vec::new();
        if limit == 0 {
            return Ok(points);
        }

        // A byte with every bit in the unwanted state carries nothing
        let skip = if want_set { 0x00 } else { 0xFF };
        let pages = (self.length + BITS_PER_PAGE - 1) / BITS_PER_PAGE;

        for page in 0..pages {
            self.load_page(page)?;
            let base = page * BITS_PER_PAGE;

            for (byte_idx, &byte) in self.cache.iter().enumerate() {
                if byte == skip {
                    continue;
                }
                for bit in 0..8u64 {
                    let point = base + byte_idx as u64 * 8 + bit;
                    if point >= self.length {
                        return Ok(points);
                    }
                    if (byte & (1 << bit) != 0) == want_set {
                        points.push(point);
                        if points.len() >= limit {
                            return Ok(points);
                        }
                    }
                }
            }
        }

        Ok(points)
    }

    fn check_range(&self, point: u64) -> Result<()> {
        if point >= self.length {
            return Err(StoreError::SectorOutOfRange {
                sector: point,
                length: self.length,
            });
        }
        Ok(())
    }

    fn write_bit(&mut self, point: u64, value: bool) -> Result<()> {
        let (page, byte_offset, bit_offset) = locate(point);
        self.load_page(page)?;

        let byte = &mut self.cache[byte_offset];
        let before = *byte;
        if value {
            *byte |= 1 << bit_offset;
        } else {
            *byte &= !(1 << bit_offset);
        }
        if *byte != before {
            self.dirty = true;
        }
        Ok(())
    }

    /// Make `page` the cached page, writing back the previous one first
    fn load_page(&mut self, page: u64) -> Result<()> {
        if self.cache_sector == Some(page) {
            return Ok(());
        }

        self.flush()?;
        self.cache.fill(0);

        let offset = page * BITMAP_PAGE_SIZE as u64;
        let available = byte_len(self.length).saturating_sub(offset).min(BITMAP_PAGE_SIZE as u64) as usize;
        if available > 0 {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.read_exact(&mut self.cache[..available])?;
        }

        self.cache_sector = Some(page);
        self.dirty = false;
        Ok(())
    }
}

impl Drop for BitmapFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!("Failed to flush bitmap {}: {}", self.path.display(), e);
        }
    }
}

fn byte_len(bits: u64) -> u64 {
    (bits + 8 - 1) / 8
}

/// Map a bit index to `(page, byte offset in page, bit offset in byte)`
fn locate(point: u64) -> (u64, usize, u32) {
    let page = point / BITS_PER_PAGE;
    let within = point % BITS_PER_PAGE;
    (page, (within / 8) as usize, (within % 8) as u32)
}
