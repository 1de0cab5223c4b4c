//! Free-space allocation inside the cartridge image
//!
//! Placement is split in two:
//! - a [`FreeSpaceScanner`] finds a candidate window of unused bytes
//! - the [`Allocator`] writes the data there and repoints every referrer
//!
//! Running out of room is not an error: [`Placement::NeedMoreSpace`] tells
//! the caller to grow the image and retry.
//!
//! The allocator remembers every range it hands out (and every range a
//! caller claims for a loaded record), so live records that happen to
//! contain runs of the free marker are never placed over.

pub mod scan;

use crate::core::address::{Address, ByteRange, PointerRef, PointerValue, Window, POINTER_SIZE};
use crate::core::image::RomImage;
use crate::core::stamp::{STAMP_ADDRESS, STAMP_SIZE};
use crate::error::{RomError, Result};
use parking_lot::Mutex;
use tracing::debug;

pub use scan::MarkerScanner;

/// Search primitive for runs of unused bytes
pub trait FreeSpaceScanner {
    /// First address in `[start, end)` where `len` unused bytes begin
    fn find_free(&self, image: &RomImage, len: usize, start: Address, end: Address)
        -> Option<Address>;

    /// Byte value written over space that is released
    fn free_marker(&self) -> u8 {
        0
    }
}

/// Outcome of a placement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Placed(Address),
    NeedMoreSpace,
}

impl Placement {
    pub fn address(self) -> Option<Address> {
        match self {
            Placement::Placed(addr) => Some(addr),
            Placement::NeedMoreSpace => None,
        }
    }
}

/// Places byte blobs into unused windows of the image
pub struct Allocator {
    scanner: Box<dyn FreeSpaceScanner>,
    /// Ranges that look free but must never be handed out
    reserved: Vec<ByteRange>,
    /// Live records: placed here, or claimed by a caller
    claimed: Mutex<Vec<ByteRange>>,
}

impl Allocator {
    pub fn new(scanner: Box<dyn FreeSpaceScanner>) -> Self {
        Allocator {
            scanner,
            reserved: vec![ByteRange::new(STAMP_ADDRESS, STAMP_SIZE)],
            claimed: Mutex::new(Vec::new()),
        }
    }

    /// Allocator using the marker scanner with the given marker and alignment
    pub fn with_marker(marker: u8, alignment: u32) -> Self {
        Self::new(Box::new(MarkerScanner::new(marker, alignment)))
    }

    /// Keep `range` out of every future placement
    pub fn reserve(&mut self, range: ByteRange) {
        if !range.is_empty() {
            self.reserved.push(range);
        }
    }

    pub fn reserved(&self) -> &[ByteRange] {
        &self.reserved
    }

    /// Mark `range` as a live record until it is released
    pub fn claim(&self, range: ByteRange) {
        if !range.is_empty() {
            self.claimed.lock().push(range);
        }
    }

    /// Live record ranges
    pub fn claimed(&self) -> Vec<ByteRange> {
        self.claimed.lock().clone()
    }

    /// Put back a set of claims taken earlier with [`claimed`](Self::claimed)
    pub fn restore_claims(&self, claims: Vec<ByteRange>) {
        *self.claimed.lock() = claims;
    }

    pub fn free_marker(&self) -> u8 {
        self.scanner.free_marker()
    }

    /// Write `data` into a free window and point every `refs` field at it
    ///
    /// Returns [`Placement::NeedMoreSpace`] when the window has no room.
    pub fn place(
        &self,
        image: &mut RomImage,
        data: &[u8],
        refs: &[PointerRef],
        window: Window,
    ) -> Result<Placement> {
        if data.is_empty() {
            return Err(RomError::Fault(
                "cannot place a zero-length record".to_string(),
            ));
        }

        let (start, end) = window.resolve(image.end());
        let mut from = start;

        loop {
            let Some(address) = self.scanner.find_free(image, data.len(), from, end) else {
                debug!(len = data.len(), %start, %end, "no free window");
                return Ok(Placement::NeedMoreSpace);
            };

            let candidate = ByteRange::new(address, data.len());
            if let Some(blocker) = self.blocker(candidate, refs) {
                // Skip past whatever the candidate collided with
                from = blocker.end();
                continue;
            }

            image.write(address, data)?;
            for &pointer in refs {
                image.write_pointer(pointer, PointerValue::At(address))?;
            }
            self.claimed.lock().push(candidate);

            debug!(
                %address,
                len = data.len(),
                pointers = refs.len(),
                "placed record"
            );
            return Ok(Placement::Placed(address));
        }
    }

    /// Release a range back to free space
    pub fn release(&self, image: &mut RomImage, range: ByteRange) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        image.fill(range, self.scanner.free_marker())?;

        let mut claimed = self.claimed.lock();
        let remaining: Vec<ByteRange> = claimed
            .iter()
            .flat_map(|live| subtract(*live, range))
            .collect();
        *claimed = remaining;
        Ok(())
    }

    fn blocker(&self, candidate: ByteRange, refs: &[PointerRef]) -> Option<ByteRange> {
        let claimed = self.claimed.lock();
        let blocker = self
            .reserved
            .iter()
            .chain(claimed.iter())
            .copied()
            .chain(
                refs.iter()
                    .map(|r| ByteRange::new(r.address(), POINTER_SIZE)),
            )
            .filter(|range| range.overlaps(&candidate))
            .max_by_key(|range| range.end());
        blocker
    }
}

/// Parts of `live` outside `gone`
fn subtract(live: ByteRange, gone: ByteRange) -> Vec<ByteRange> {
    if !live.overlaps(&gone) {
        return vec![live];
    }
    let mut parts = Vec::with_capacity(2);
    if live.start < gone.start {
        parts.push(ByteRange::new(live.start, (gone.start.0 - live.start.0) as usize));
    }
    if gone.end() < live.end() {
        parts.push(ByteRange::new(gone.end(), (live.end().0 - gone.end().0) as usize));
    }
    parts
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(Box::new(MarkerScanner::default()))
    }
}
