//! Cartridge address space
//!
//! The image is mapped at a fixed origin: absolute address `0x08000000`
//! corresponds to file offset 0. Pointers stored inside the image are
//! 4-byte little-endian absolute addresses with two reserved sentinels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute address of file offset 0
pub const ORIGIN: u32 = 0x0800_0000;

/// Pointer sentinel: no record
pub const POINTER_UNSET: u32 = 0;

/// Pointer sentinel: record exists but has zero length
pub const POINTER_EMPTY: u32 = 1;

/// Size of an encoded pointer in bytes
pub const POINTER_SIZE: usize = 4;

/// Absolute cartridge address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u32);

impl Address {
    pub const ORIGIN: Address = Address(ORIGIN);

    /// Address of a file offset
    pub fn from_offset(offset: usize) -> Address {
        Address(ORIGIN.wrapping_add(offset as u32))
    }

    /// File offset of this address, or `None` below the origin
    pub fn to_offset(self) -> Option<usize> {
        self.0.checked_sub(ORIGIN).map(|o| o as usize)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn checked_add(self, len: usize) -> Option<Address> {
        u32::try_from(len)
            .ok()
            .and_then(|len| self.0.checked_add(len))
            .map(Address)
    }

    /// Round up to the next multiple of `align` (a power of two)
    pub fn align_up(self, align: u32) -> Address {
        if align <= 1 {
            return self;
        }
        let mask = align - 1;
        Address(self.0.saturating_add(mask) & !mask)
    }

    pub fn is_aligned(self, align: u32) -> bool {
        align <= 1 || self.0 % align == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Decoded value of a pointer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerValue {
    /// Sentinel 0
    Unset,
    /// Sentinel 1: record exists with zero length
    Empty,
    At(Address),
}

impl PointerValue {
    pub fn decode(raw: u32) -> Self {
        match raw {
            POINTER_UNSET => PointerValue::Unset,
            POINTER_EMPTY => PointerValue::Empty,
            other => PointerValue::At(Address(other)),
        }
    }

    pub fn encode(self) -> u32 {
        match self {
            PointerValue::Unset => POINTER_UNSET,
            PointerValue::Empty => POINTER_EMPTY,
            PointerValue::At(addr) => addr.0,
        }
    }

    pub fn to_bytes(self) -> [u8; POINTER_SIZE] {
        self.encode().to_le_bytes()
    }

    pub fn address(self) -> Option<Address> {
        match self {
            PointerValue::At(addr) => Some(addr),
            _ => None,
        }
    }
}

/// Location of a 4-byte pointer field that references a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointerRef(pub Address);

impl PointerRef {
    pub fn at(address: Address) -> Self {
        PointerRef(address)
    }

    /// Pointer field located at a file offset
    pub fn at_offset(offset: usize) -> Self {
        PointerRef(Address::from_offset(offset))
    }

    pub fn address(self) -> Address {
        self.0
    }
}

/// Contiguous byte range of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: Address,
    pub len: usize,
}

impl ByteRange {
    pub fn new(start: Address, len: usize) -> Self {
        ByteRange { start, len }
    }

    /// Exclusive end address (saturating)
    pub fn end(&self) -> Address {
        self.start
            .checked_add(self.len)
            .unwrap_or(Address(u32::MAX))
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.end()
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }
}

/// Search window for free space
///
/// `end == None` means "up to the current end of the image", so growing the
/// image also widens the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Address,
    pub end: Option<Address>,
}

impl Window {
    /// Whole image
    pub fn image() -> Self {
        Window {
            start: Address::ORIGIN,
            end: None,
        }
    }

    /// Everything from `start` to the end of the image
    pub fn from(start: Address) -> Self {
        Window { start, end: None }
    }

    pub fn bounded(start: Address, end: Address) -> Self {
        Window {
            start,
            end: Some(end),
        }
    }

    /// Concrete bounds against an image ending at `image_end`
    pub fn resolve(&self, image_end: Address) -> (Address, Address) {
        let end = match self.end {
            Some(end) => end.min(image_end),
            None => image_end,
        };
        (self.start.max(Address::ORIGIN), end)
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::image()
    }
}
