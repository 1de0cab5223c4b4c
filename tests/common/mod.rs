//! Shared image fixtures for integration tests

#![allow(dead_code)]

use romcart::{Address, RomSession, SessionBuilder, SessionConfig, MIN_IMAGE_SIZE};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const RECORD_POINTER: usize = 0x100;
pub const TILESET_POINTER: u32 = 0x0803_4560;
pub const TILESET_RECORD: u32 = 0x0820_1000;
pub const TILESET_LEN: usize = 0x800;
pub const LEGACY_REGION: u32 = 0x0820_0000;
pub const LEGACY_REGION_LEN: usize = 0x8000;
pub const MUSIC_SCALARS: u32 = 0x0815_0000;
pub const MUSIC_TABLE_POINTER: u32 = 0x083F_001C;

pub struct Fixture {
    pub dir: TempDir,
    pub rom: PathBuf,
}

impl Fixture {
    /// 4 MiB image with no free space at all
    pub fn full() -> Self {
        Self::with_bytes(vec![0xFF; MIN_IMAGE_SIZE as usize])
    }

    /// 4 MiB image in the unpatched layout the built-in catalog expects
    ///
    /// Code and data fill the first 0x180000 bytes and the legacy tileset
    /// region; everything else is free (zero).
    pub fn vanilla() -> Self {
        let mut data = vec![0u8; MIN_IMAGE_SIZE as usize];
        data[..0x18_0000].fill(0xFF);
        let region = offset(LEGACY_REGION);
        data[region..region + LEGACY_REGION_LEN].fill(0xFF);

        put(&mut data, 0x0801_2A40, &[0x00, 0xB5, 0x04, 0x1C]);
        put(&mut data, 0x0801_2B10, &[0x30, 0xB5, 0x05, 0x1C]);
        put(&mut data, 0x0803_4500, &[0x01, 0x20, 0x70, 0x47]);
        put(&mut data, 0x0800_A2C0, &[0x01, 0xD1, 0x00, 0x20]);

        for item in 0..8u32 {
            put(&mut data, MUSIC_SCALARS + item * 4, &[(item % 6) as u8]);
        }

        put(&mut data, TILESET_RECORD, &[0x7E; TILESET_LEN]);
        put(&mut data, TILESET_POINTER, &TILESET_RECORD.to_le_bytes());

        Self::with_bytes(data)
    }

    pub fn with_bytes(data: Vec<u8>) -> Self {
        let dir = TempDir::new().unwrap();
        let rom = dir.path().join("game.gba");
        std::fs::write(&rom, data).unwrap();
        Fixture { dir, rom }
    }

    pub fn recovery_root(&self) -> PathBuf {
        self.dir.path().join("recovery")
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::with_recovery_root(self.recovery_root())
    }

    pub fn open(&self) -> RomSession {
        self.builder().open(&self.rom).unwrap()
    }

    pub fn builder(&self) -> SessionBuilder {
        SessionBuilder::new().config(self.config())
    }

    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.rom).unwrap()
    }

    pub fn path(&self) -> &Path {
        &self.rom
    }
}

pub fn offset(address: u32) -> usize {
    Address(address).to_offset().unwrap()
}

pub fn put(data: &mut [u8], address: u32, bytes: &[u8]) {
    let at = offset(address);
    data[at..at + bytes.len()].copy_from_slice(bytes);
}

pub fn read_u32(data: &[u8], address: u32) -> u32 {
    let at = offset(address);
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
