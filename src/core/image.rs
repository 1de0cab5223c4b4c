//! In-memory cartridge image backed by a file on disk
//!
//! The file is only opened for the duration of a single load or flush; no
//! handle is kept between operations.

use crate::core::address::{Address, ByteRange, PointerRef, PointerValue, POINTER_SIZE};
use crate::error::{RomError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Smallest valid image (4 MiB)
pub const MIN_IMAGE_SIZE: u32 = 0x40_0000;

/// Hard ceiling for image growth (32 MiB)
pub const MAX_IMAGE_SIZE: u32 = 0x200_0000;

/// Cartridge image bytes plus the file they were loaded from
#[derive(Debug, Clone)]
pub struct RomImage {
    path: PathBuf,
    data: Vec<u8>,
}

impl RomImage {
    /// Load an image from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = read_whole(&path)?;
        Self::from_bytes(path, data)
    }

    /// Wrap bytes that belong to `path` without touching the disk
    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<Self> {
        validate_size(data.len() as u64)?;
        Ok(RomImage {
            path: path.into(),
            data,
        })
    }

    /// Create a new image file of `size` bytes filled with `fill`
    pub fn create<P: AsRef<Path>>(path: P, size: u32, fill: u8) -> Result<Self> {
        validate_size(size as u64)?;
        let image = RomImage {
            path: path.as_ref().to_path_buf(),
            data: vec![fill; size as usize],
        };
        image.flush()?;
        Ok(image)
    }

    /// Fail with `FileAccess` unless the backing file exists and is readable
    pub fn check_accessible(&self) -> Result<()> {
        File::open(&self.path)
            .map(drop)
            .map_err(|e| RomError::file_access(&self.path, e))
    }

    /// Write the whole image back to its file
    pub fn flush(&self) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| RomError::file_access(&self.path, e))?;
        file.write_all(&self.data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Discard in-memory bytes and re-read the file
    pub fn reload(&mut self) -> Result<()> {
        let data = read_whole(&self.path)?;
        validate_size(data.len() as u64)?;
        self.data = data;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// One past the last mapped address
    pub fn end(&self) -> Address {
        Address::from_offset(self.data.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// CRC-32 of the full image
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.data)
    }

    fn span(&self, address: Address, len: usize) -> Result<std::ops::Range<usize>> {
        let out_of_range = || RomError::AddressOutOfRange {
            address,
            len,
            size: self.size(),
        };
        let start = address.to_offset().ok_or_else(out_of_range)?;
        let end = start.checked_add(len).ok_or_else(out_of_range)?;
        if end > self.data.len() {
            return Err(out_of_range());
        }
        Ok(start..end)
    }

    pub fn read(&self, address: Address, len: usize) -> Result<&[u8]> {
        let span = self.span(address, len)?;
        Ok(&self.data[span])
    }

    pub fn read_range(&self, range: ByteRange) -> Result<&[u8]> {
        self.read(range.start, range.len)
    }

    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let span = self.span(address, bytes.len())?;
        self.data[span].copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a range with a single byte value
    pub fn fill(&mut self, range: ByteRange, value: u8) -> Result<()> {
        let span = self.span(range.start, range.len)?;
        self.data[span].fill(value);
        Ok(())
    }

    pub fn zero_fill(&mut self, range: ByteRange) -> Result<()> {
        self.fill(range, 0)
    }

    pub fn read_u16(&self, address: Address) -> Result<u16> {
        let b = self.read(address, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, address: Address) -> Result<u32> {
        let b = self.read(address, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_u32(&mut self, address: Address, value: u32) -> Result<()> {
        self.write(address, &value.to_le_bytes())
    }

    pub fn read_pointer(&self, at: PointerRef) -> Result<PointerValue> {
        self.read_u32(at.address()).map(PointerValue::decode)
    }

    pub fn write_pointer(&mut self, at: PointerRef, value: PointerValue) -> Result<()> {
        let bytes = value.to_bytes();
        debug_assert_eq!(bytes.len(), POINTER_SIZE);
        self.write(at.address(), &bytes)
    }

    /// Append zero bytes up to `new_size`; never shrinks
    pub(crate) fn extend_to(&mut self, new_size: u32) {
        if new_size as usize > self.data.len() {
            self.data.resize(new_size as usize, 0);
        }
    }

    /// Swap in a complete set of bytes (used by rollback)
    pub(crate) fn replace_bytes(&mut self, data: Vec<u8>) -> Result<()> {
        validate_size(data.len() as u64)?;
        self.data = data;
        Ok(())
    }
}

fn read_whole(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| RomError::file_access(path, e))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| RomError::file_access(path, e))?;
    Ok(data)
}

fn validate_size(size: u64) -> Result<()> {
    if size < MIN_IMAGE_SIZE as u64 || size > MAX_IMAGE_SIZE as u64 {
        return Err(RomError::InvalidImageSize(size));
    }
    Ok(())
}
