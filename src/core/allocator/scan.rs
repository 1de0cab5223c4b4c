//! First-fit marker scan
//!
//! A byte is considered unused when it equals the marker value. Erased
//! records and freshly grown space are zero-filled, so the default marker is
//! `0x00`.

use crate::core::address::Address;
use crate::core::allocator::FreeSpaceScanner;
use crate::core::image::RomImage;

/// Default alignment of placed records
pub const DEFAULT_ALIGNMENT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerScanner {
    marker: u8,
    alignment: u32,
}

impl MarkerScanner {
    /// `alignment` is rounded up to a power of two; 0 is treated as 1
    pub fn new(marker: u8, alignment: u32) -> Self {
        MarkerScanner {
            marker,
            alignment: alignment.max(1).next_power_of_two(),
        }
    }

    pub fn marker(&self) -> u8 {
        self.marker
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }
}

impl Default for MarkerScanner {
    fn default() -> Self {
        MarkerScanner::new(0x00, DEFAULT_ALIGNMENT)
    }
}

impl FreeSpaceScanner for MarkerScanner {
    fn find_free(
        &self,
        image: &RomImage,
        len: usize,
        start: Address,
        end: Address,
    ) -> Option<Address> {
        if len == 0 {
            return None;
        }

        let bytes = image.as_bytes();
        let limit = end.to_offset()?.min(bytes.len());
        let align = self.alignment as usize;
        let align_up = |offset: usize| (offset + align - 1) & !(align - 1);

        let mut candidate = align_up(start.to_offset()?);
        while candidate.checked_add(len)? <= limit {
            // Jump past the last used byte inside the candidate run
            match bytes[candidate..candidate + len]
                .iter()
                .rposition(|&b| b != self.marker)
            {
                None => return Some(Address::from_offset(candidate)),
                Some(used) => candidate = align_up(candidate + used + 1),
            }
        }

        None
    }

    fn free_marker(&self) -> u8 {
        self.marker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::ByteRange;
    use crate::core::image::MIN_IMAGE_SIZE;

    fn image_with_holes(holes: &[(usize, usize)]) -> RomImage {
        let mut image =
            RomImage::from_bytes("mem.gba", vec![0xFF; MIN_IMAGE_SIZE as usize]).unwrap();
        for &(offset, len) in holes {
            image
                .zero_fill(ByteRange::new(Address::from_offset(offset), len))
                .unwrap();
        }
        image
    }

    #[test]
    fn test_first_fit() {
        let image = image_with_holes(&[(0x100, 0x10), (0x200, 0x40), (0x400, 0x80)]);
        let scanner = MarkerScanner::default();

        let found = scanner.find_free(&image, 0x20, Address::ORIGIN, image.end());
        assert_eq!(found, Some(Address::from_offset(0x200)));
    }

    #[test]
    fn test_alignment_skips_unaligned_start() {
        let image = image_with_holes(&[(0x101, 0x20)]);
        let scanner = MarkerScanner::new(0, 4);

        let found = scanner.find_free(&image, 0x10, Address::ORIGIN, image.end());
        assert_eq!(found, Some(Address::from_offset(0x104)));

        let tight = scanner.find_free(&image, 0x1F, Address::ORIGIN, image.end());
        assert_eq!(tight, None);
    }

    #[test]
    fn test_end_is_exclusive() {
        let image = image_with_holes(&[(0x100, 0x10)]);
        let scanner = MarkerScanner::default();

        let end = Address::from_offset(0x10F);
        assert_eq!(
            scanner.find_free(&image, 0x10, Address::ORIGIN, end),
            None
        );
        let end = Address::from_offset(0x110);
        assert_eq!(
            scanner.find_free(&image, 0x10, Address::ORIGIN, end),
            Some(Address::from_offset(0x100))
        );
    }

    #[test]
    fn test_custom_marker() {
        let mut image =
            RomImage::from_bytes("mem.gba", vec![0x00; MIN_IMAGE_SIZE as usize]).unwrap();
        image
            .fill(ByteRange::new(Address::from_offset(0x800), 0x20), 0xFF)
            .unwrap();
        let scanner = MarkerScanner::new(0xFF, 16);

        let found = scanner.find_free(&image, 0x20, Address::ORIGIN, image.end());
        assert_eq!(found, Some(Address::from_offset(0x800)));
        assert_eq!(scanner.free_marker(), 0xFF);
    }

    #[test]
    fn test_alignment_normalised() {
        assert_eq!(MarkerScanner::new(0, 0).alignment(), 1);
        assert_eq!(MarkerScanner::new(0, 3).alignment(), 4);
    }
}
