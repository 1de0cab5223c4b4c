//! Image growth
//!
//! The image only ever grows, in whole increments, and never beyond the
//! 32 MiB ceiling. Placement that runs out of room grows the image and
//! retries; the loop ends either with a placement or with
//! [`RomError::GrowthRefused`] once the ceiling is reached.

use crate::core::address::{Address, PointerRef, Window};
use crate::core::allocator::{Allocator, Placement};
use crate::core::image::{RomImage, MAX_IMAGE_SIZE};
use crate::error::{RomError, Result};
use tracing::info;

/// Default growth increment (1 MiB)
pub const GROWTH_STEP: u32 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthManager {
    step: u32,
    ceiling: u32,
}

impl GrowthManager {
    /// `step` must be a non-zero multiple of [`GROWTH_STEP`]
    pub fn new(step: u32) -> Result<Self> {
        if !is_whole_increment(step) {
            return Err(RomError::InvalidIncrement(step));
        }
        Ok(GrowthManager {
            step,
            ceiling: MAX_IMAGE_SIZE,
        })
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Append `increment` zero bytes, clamped to the ceiling
    ///
    /// `increment` must be a non-zero multiple of [`GROWTH_STEP`]. Returns
    /// the new size, or `GrowthRefused` when the image is already at the
    /// ceiling.
    pub fn expand(&self, image: &mut RomImage, increment: u32) -> Result<u32> {
        if !is_whole_increment(increment) {
            return Err(RomError::InvalidIncrement(increment));
        }

        let current = image.size();
        if current >= self.ceiling {
            return Err(RomError::GrowthRefused { size: current });
        }

        let new_size = current.saturating_add(increment).min(self.ceiling);
        info!("Growing image: {:#x} -> {:#x} bytes", current, new_size);
        image.extend_to(new_size);

        Ok(new_size)
    }

    /// Grow by one step
    pub fn grow(&self, image: &mut RomImage) -> Result<u32> {
        self.expand(image, self.step)
    }

    /// Place `data`, growing the image until it fits
    ///
    /// A bounded window that already ends inside the image cannot be helped
    /// by growth and fails with `WindowExhausted` instead.
    pub fn place(
        &self,
        allocator: &Allocator,
        image: &mut RomImage,
        data: &[u8],
        refs: &[PointerRef],
        window: Window,
    ) -> Result<Address> {
        loop {
            match allocator.place(image, data, refs, window)? {
                Placement::Placed(address) => return Ok(address),
                Placement::NeedMoreSpace => {
                    if let Some(end) = window.end {
                        if end <= image.end() {
                            return Err(RomError::WindowExhausted {
                                len: data.len(),
                                start: window.start,
                                end,
                            });
                        }
                    }
                    self.grow(image)?;
                }
            }
        }
    }
}

/// Whether `n` is a non-zero number of whole growth steps
pub fn is_whole_increment(n: u32) -> bool {
    n != 0 && n % GROWTH_STEP == 0
}

impl Default for GrowthManager {
    fn default() -> Self {
        GrowthManager {
            step: GROWTH_STEP,
            ceiling: MAX_IMAGE_SIZE,
        }
    }
}
