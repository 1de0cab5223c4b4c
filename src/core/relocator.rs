//! Record and pointer-table relocation
//!
//! Saving a record never edits it in place: the ranges it occupied when it
//! was loaded are released first, then the new bytes are placed wherever
//! the allocator finds room and every owning pointer is rewritten.

use crate::core::address::{
    Address, ByteRange, PointerRef, PointerValue, Window, POINTER_SIZE, POINTER_UNSET,
};
use crate::core::allocator::Allocator;
use crate::core::growth::GrowthManager;
use crate::core::image::RomImage;
use crate::error::{RomError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a pointer table's length is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// Fixed number of entries, no end marker
    Counted(usize),
    /// Entries run until this sentinel value, which is stored after them
    Terminated(u32),
}

/// Ordered sequence of pointers indexed by ID
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointerTable {
    pub entries: Vec<u32>,
    /// End marker written after the last entry, if the table uses one
    pub terminator: Option<u32>,
}

impl PointerTable {
    pub fn new(entries: Vec<u32>, terminator: Option<u32>) -> Self {
        PointerTable {
            entries,
            terminator,
        }
    }

    /// Read a table stored at `at`
    pub fn read(image: &RomImage, at: Address, layout: TableLayout) -> Result<Self> {
        let word = |index: usize| -> Result<u32> {
            let address = at
                .checked_add(index * POINTER_SIZE)
                .ok_or(RomError::AddressOutOfRange {
                    address: at,
                    len: (index + 1) * POINTER_SIZE,
                    size: image.size(),
                })?;
            image.read_u32(address)
        };

        match layout {
            TableLayout::Counted(count) => {
                let entries = (0..count).map(word).collect::<Result<Vec<_>>>()?;
                Ok(PointerTable::new(entries, None))
            }
            TableLayout::Terminated(sentinel) => {
                let mut entries = Vec::new();
                loop {
                    // Running off the image end surfaces as AddressOutOfRange
                    let value = word(entries.len())?;
                    if value == sentinel {
                        break;
                    }
                    entries.push(value);
                }
                Ok(PointerTable::new(entries, Some(sentinel)))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<PointerValue> {
        self.entries.get(id).copied().map(PointerValue::decode)
    }

    /// Set entry `id`, extending the table with unset entries if needed
    pub fn set(&mut self, id: usize, value: PointerValue) {
        if id >= self.entries.len() {
            self.entries.resize(id + 1, POINTER_UNSET);
        }
        self.entries[id] = value.encode();
    }

    pub fn push(&mut self, value: PointerValue) {
        self.entries.push(value.encode());
    }

    /// Encoded size including the end marker
    pub fn byte_len(&self) -> usize {
        (self.entries.len() + usize::from(self.terminator.is_some())) * POINTER_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        for entry in self.entries.iter().chain(self.terminator.iter()) {
            bytes.extend_from_slice(&entry.to_le_bytes());
        }
        bytes
    }

    /// Range the table occupies when stored at `at`
    pub fn range_at(&self, at: Address) -> ByteRange {
        ByteRange::new(at, self.byte_len())
    }
}

/// Moves records and tables, growing the image when needed
pub struct Relocator<'a> {
    allocator: &'a Allocator,
    growth: &'a GrowthManager,
}

impl<'a> Relocator<'a> {
    pub fn new(allocator: &'a Allocator, growth: &'a GrowthManager) -> Self {
        Relocator { allocator, growth }
    }

    /// Range currently owned by the pointer at `at`, if it points anywhere
    ///
    /// Call this when a record is loaded and pass the result back to
    /// [`save_record`](Self::save_record) when it is saved.
    pub fn capture(image: &RomImage, at: PointerRef, len: usize) -> Result<Option<ByteRange>> {
        Ok(image
            .read_pointer(at)?
            .address()
            .filter(|_| len > 0)
            .map(|start| ByteRange::new(start, len)))
    }

    /// Replace a record
    ///
    /// Releases `old_ranges`, then places `data` and repoints `refs`.
    /// Zero-length data is not written anywhere: the pointers are set to
    /// the "exists, empty" sentinel. The old ranges are still released in
    /// that case, so an emptied record does not keep its space.
    pub fn save_record(
        &self,
        image: &mut RomImage,
        old_ranges: &[ByteRange],
        data: &[u8],
        refs: &[PointerRef],
        window: Window,
    ) -> Result<PointerValue> {
        for &range in old_ranges {
            self.allocator.release(image, range)?;
            debug!(start = %range.start, len = range.len, "released old record range");
        }

        if data.is_empty() {
            for &pointer in refs {
                image.write_pointer(pointer, PointerValue::Empty)?;
            }
            return Ok(PointerValue::Empty);
        }

        let address = self
            .growth
            .place(self.allocator, image, data, refs, window)?;
        Ok(PointerValue::At(address))
    }

    /// Write a rebuilt table, relocating it if its size changed
    ///
    /// `old` is where the previous version of the table lives. When the
    /// encoded length is unchanged the table is overwritten in place.
    pub fn rebuild_table(
        &self,
        image: &mut RomImage,
        old: Option<ByteRange>,
        table: &PointerTable,
        refs: &[PointerRef],
        window: Window,
    ) -> Result<PointerValue> {
        let bytes = table.to_bytes();

        if let Some(old) = old {
            if old.len == bytes.len() && !bytes.is_empty() {
                image.write(old.start, &bytes)?;
                self.allocator.claim(old);
                for &pointer in refs {
                    image.write_pointer(pointer, PointerValue::At(old.start))?;
                }
                debug!(start = %old.start, entries = table.len(), "rewrote table in place");
                return Ok(PointerValue::At(old.start));
            }
        }

        let old_ranges: Vec<ByteRange> = old.into_iter().collect();
        let result = self.save_record(image, &old_ranges, &bytes, refs, window)?;
        debug!(entries = table.len(), ?result, "relocated table");
        Ok(result)
    }
}
