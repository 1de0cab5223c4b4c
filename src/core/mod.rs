//! Image transaction and patch subsystem

pub mod address;
pub mod allocator;
pub mod backup;
pub mod growth;
pub mod image;
pub mod patch;
pub mod recovery;
pub mod relocator;
pub mod session;
pub mod settings;
pub mod stamp;
pub mod transaction;
pub mod validation;

pub use session::{RomSession, SessionBuilder};
