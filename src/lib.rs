//! # romcart - transactional editing of cartridge images
//!
//! `romcart` safely mutates fixed-origin GBA cartridge images:
//!
//! - **Free-space allocation** of variable-length records, with automatic
//!   growth in 1 MiB steps up to the 32 MiB ceiling
//! - **Relocation** of pointer-addressed records and pointer tables
//! - **Optional patches** with tri-state detection and data migration
//! - **Whole-image backup and rollback** around every mutation, so a failure
//!   never leaves a half-written image behind
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use romcart::{PointerRef, RomSession, SessionConfig, Window, Result};
//!
//! # fn main() -> Result<()> {
//! let mut session = RomSession::open("game.gba", SessionConfig::default())?;
//!
//! // Move the record referenced at offset 0x100 into free space
//! let pointer = PointerRef::at_offset(0x100);
//! let old = session.capture(pointer, 0x1000)?;
//! let new_bytes = vec![0u8; 0x1000];
//! session.save_record(old.as_slice(), &new_bytes, &[pointer], Window::image())?;
//!
//! // Optional features
//! if session.apply_patch("musicoverride") {
//!     println!("music override installed");
//! }
//!
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    address::{Address, ByteRange, PointerRef, PointerValue, Window, ORIGIN},
    allocator::{Allocator, FreeSpaceScanner, MarkerScanner, Placement},
    backup::{BackupMetadata, BackupStore},
    growth::{GrowthManager, GROWTH_STEP},
    image::{RomImage, MAX_IMAGE_SIZE, MIN_IMAGE_SIZE},
    patch::{
        Matcher, MigrationStep, PatchDescriptor, PatchInstaller, PatchRegistry, PatchStateTable,
        PatchStatus, Signature,
    },
    recovery::{RecoveryExporter, SubUnit},
    relocator::{PointerTable, Relocator, TableLayout},
    session::{RomSession, SessionBuilder},
    settings::{ImageSettings, SessionConfig},
    stamp::MetadataStamp,
    transaction::{AutoConfirm, Confirm, MemorySink, StatusSink, TracingSink, Transaction, TxState},
    validation::PatchKey,
};
pub use crate::error::{Result, RomError};

/// Crate version, stamped into images on save
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
