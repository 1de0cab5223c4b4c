//! Data migrations run after a patch's verbatim writes

use crate::core::address::{Address, ByteRange, PointerRef, PointerValue, Window};
use crate::core::image::RomImage;
use crate::core::patch::Migration;
use crate::core::relocator::{PointerTable, Relocator};
use crate::error::{RomError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Built-in migration kinds, as written in patch catalogs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Move a record out of a legacy region the patch takes over as free
    /// space. Records already moved elsewhere are left alone.
    RelocateFromRegion {
        /// Pointer field owning the record
        pointer: PointerRef,
        /// Record size in bytes
        length: usize,
        region_start: Address,
        region_len: usize,
        /// Release the whole region once the record is out of it
        #[serde(default)]
        clear_region: bool,
    },

    /// Build a table from per-item scalar settings through a lookup table
    DeriveTable {
        /// First item's scalar
        source: Address,
        /// Number of items
        count: usize,
        /// Distance between consecutive items' scalars
        stride: usize,
        /// `lookup[scalar]` becomes the item's table entry
        lookup: Vec<u32>,
        /// Used for scalars past the end of `lookup`; otherwise they fault
        #[serde(default)]
        fallback: Option<u32>,
        /// Pointer field that receives the table address
        table_pointer: PointerRef,
        #[serde(default)]
        terminator: Option<u32>,
    },
}

impl MigrationStep {
    pub fn validate(&self) -> Result<()> {
        match self {
            MigrationStep::RelocateFromRegion {
                length, region_len, ..
            } => {
                if *length == 0 || *region_len == 0 {
                    return Err(RomError::InvalidCatalog(
                        "relocate_from_region needs non-zero length and region_len".to_string(),
                    ));
                }
            }
            MigrationStep::DeriveTable {
                count,
                stride,
                lookup,
                ..
            } => {
                if *count > 0 && *stride == 0 {
                    return Err(RomError::InvalidCatalog(
                        "derive_table stride must be non-zero".to_string(),
                    ));
                }
                if lookup.is_empty() {
                    return Err(RomError::InvalidCatalog(
                        "derive_table lookup is empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn relocate_from_region(
        image: &mut RomImage,
        relocator: &Relocator<'_>,
        pointer: PointerRef,
        length: usize,
        region: ByteRange,
        clear_region: bool,
    ) -> Result<()> {
        let current = image.read_pointer(pointer)?;
        match current.address() {
            Some(address) if region.contains(address) => {
                let old = ByteRange::new(address, length);
                let bytes = image.read_range(old)?.to_vec();
                let moved = relocator.save_record(
                    image,
                    &[old],
                    &bytes,
                    &[pointer],
                    Window::from(region.end()),
                )?;
                info!("Moved record {} -> {:?} out of legacy region", address, moved);
            }
            _ => debug!(?current, "record not in legacy region, leaving it"),
        }

        if clear_region {
            image.zero_fill(region)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn derive_table(
        image: &mut RomImage,
        relocator: &Relocator<'_>,
        source: Address,
        count: usize,
        stride: usize,
        lookup: &[u32],
        fallback: Option<u32>,
        table_pointer: PointerRef,
        terminator: Option<u32>,
    ) -> Result<()> {
        let mut table = PointerTable::new(Vec::with_capacity(count), terminator);

        for item in 0..count {
            let at = source
                .checked_add(item * stride)
                .ok_or_else(|| RomError::Fault(format!("item {} address overflows", item)))?;
            let scalar = image.read(at, 1)?[0] as usize;
            let entry = lookup.get(scalar).copied().or(fallback).ok_or_else(|| {
                RomError::Fault(format!(
                    "item {} at {} has setting {} outside the {}-entry lookup",
                    item,
                    at,
                    scalar,
                    lookup.len()
                ))
            })?;
            table.entries.push(entry);
        }

        let result = relocator.rebuild_table(image, None, &table, &[table_pointer], Window::image())?;
        if let PointerValue::At(address) = result {
            info!("Derived {}-entry table at {}", table.len(), address);
        }
        Ok(())
    }
}

impl Migration for MigrationStep {
    fn migrate(&self, image: &mut RomImage, relocator: &Relocator<'_>) -> Result<()> {
        match self {
            MigrationStep::RelocateFromRegion {
                pointer,
                length,
                region_start,
                region_len,
                clear_region,
            } => Self::relocate_from_region(
                image,
                relocator,
                *pointer,
                *length,
                ByteRange::new(*region_start, *region_len),
                *clear_region,
            ),
            MigrationStep::DeriveTable {
                source,
                count,
                stride,
                lookup,
                fallback,
                table_pointer,
                terminator,
            } => Self::derive_table(
                image,
                relocator,
                *source,
                *count,
                *stride,
                lookup,
                *fallback,
                *table_pointer,
                *terminator,
            ),
        }
    }

    fn describe(&self) -> String {
        match self {
            MigrationStep::RelocateFromRegion { pointer, .. } => {
                format!("relocate record owned by {}", pointer.address())
            }
            MigrationStep::DeriveTable { table_pointer, .. } => {
                format!("derive table for {}", table_pointer.address())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::allocator::Allocator;
    use crate::core::growth::GrowthManager;
    use crate::core::image::MIN_IMAGE_SIZE;
    use crate::core::relocator::TableLayout;

    fn used_image() -> RomImage {
        RomImage::from_bytes("mem.gba", vec![0xFF; MIN_IMAGE_SIZE as usize]).unwrap()
    }

    fn relocate_step(clear_region: bool) -> MigrationStep {
        MigrationStep::RelocateFromRegion {
            pointer: PointerRef::at_offset(0x34560),
            length: 0x800,
            region_start: Address(0x0820_0000),
            region_len: 0x8000,
            clear_region,
        }
    }

    #[test]
    fn test_relocates_record_still_in_region() {
        let mut image = used_image();
        let allocator = Allocator::default();
        let growth = GrowthManager::default();
        let relocator = Relocator::new(&allocator, &growth);

        let record = Address(0x0820_1000);
        image.write(record, &[0x42; 0x800]).unwrap();
        image
            .write_pointer(PointerRef::at_offset(0x34560), PointerValue::At(record))
            .unwrap();

        relocate_step(true).migrate(&mut image, &relocator).unwrap();

        let moved = image
            .read_pointer(PointerRef::at_offset(0x34560))
            .unwrap()
            .address()
            .unwrap();
        assert!(moved >= Address(0x0820_8000));
        assert_eq!(image.read(moved, 0x800).unwrap(), &[0x42; 0x800]);
        let region = ByteRange::new(Address(0x0820_0000), 0x8000);
        assert!(image.read_range(region).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_leaves_already_moved_record() {
        let mut image = used_image();
        let allocator = Allocator::default();
        let growth = GrowthManager::default();
        let relocator = Relocator::new(&allocator, &growth);

        let elsewhere = PointerValue::At(Address(0x0830_0000));
        image
            .write_pointer(PointerRef::at_offset(0x34560), elsewhere)
            .unwrap();
        let before = image.as_bytes().to_vec();

        relocate_step(false).migrate(&mut image, &relocator).unwrap();

        assert_eq!(image.as_bytes(), before.as_slice());
    }

    #[test]
    fn test_derive_table_from_scalars() {
        let mut image = used_image();
        let allocator = Allocator::default();
        let growth = GrowthManager::default();
        let relocator = Relocator::new(&allocator, &growth);

        let source = Address(0x0815_0000);
        for (i, scalar) in [2u8, 0, 1, 3].iter().enumerate() {
            image.write(Address(source.get() + i as u32 * 4), &[*scalar]).unwrap();
        }
        let step = MigrationStep::DeriveTable {
            source,
            count: 4,
            stride: 4,
            lookup: vec![0x101, 0x102, 0x103, 0x104],
            fallback: None,
            table_pointer: PointerRef(Address(0x083F_001C)),
            terminator: Some(0xFFFF),
        };

        step.migrate(&mut image, &relocator).unwrap();

        let at = image
            .read_pointer(PointerRef(Address(0x083F_001C)))
            .unwrap()
            .address()
            .unwrap();
        let table = PointerTable::read(&image, at, TableLayout::Terminated(0xFFFF)).unwrap();
        assert_eq!(table.entries, vec![0x103, 0x101, 0x102, 0x104]);
    }

    #[test]
    fn test_derive_table_rejects_unknown_setting() {
        let mut image = used_image();
        let allocator = Allocator::default();
        let growth = GrowthManager::default();
        let relocator = Relocator::new(&allocator, &growth);

        let step = MigrationStep::DeriveTable {
            source: Address(0x0815_0000),
            count: 1,
            stride: 4,
            lookup: vec![0x101],
            fallback: None,
            table_pointer: PointerRef(Address(0x083F_001C)),
            terminator: None,
        };

        // Scalar reads as 0xFF
        assert!(matches!(
            step.migrate(&mut image, &relocator),
            Err(RomError::Fault(_))
        ));
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            migrations: Vec<MigrationStep>,
        }

        let doc: Doc = toml::from_str(
            r#"
            [[migrations]]
            kind = "relocate_from_region"
            pointer = 0x08034560
            length = 2048
            region_start = 0x08200000
            region_len = 0x8000

            [[migrations]]
            kind = "derive_table"
            source = 0x08150000
            count = 8
            stride = 4
            lookup = [0x101, 0x102]
            fallback = 0
            table_pointer = 0x083F001C
            "#,
        )
        .unwrap();

        assert_eq!(doc.migrations.len(), 2);
        assert_eq!(doc.migrations[0], relocate_step(false));
        assert!(doc.migrations.iter().all(|m| m.validate().is_ok()));
    }
}
