use std::path::PathBuf;
use thiserror::Error;

use crate::core::address::Address;
use crate::core::patch::PatchStatus;

#[derive(Error, Debug)]
pub enum RomError {
    #[error("Image cannot grow: already at the {size:#x}-byte ceiling")]
    GrowthRefused { size: u32 },

    #[error("Cannot access image {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot determine state of patch '{key}'")]
    Indeterminate { key: String },

    #[error("Patch '{key}' cannot be installed: state is {status}")]
    PatchNotApplicable { key: String, status: PatchStatus },

    #[error("Patch '{key}' requires '{requires}' to be applied first")]
    MissingPrerequisite { key: String, requires: String },

    #[error("Unknown patch: {0}")]
    UnknownPatch(String),

    #[error("Invalid patch key: {0} (must be lowercase letters and digits)")]
    InvalidPatchKey(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Address {address} (+{len:#x} bytes) is outside the {size:#x}-byte image")]
    AddressOutOfRange { address: Address, len: usize, size: u32 },

    #[error("Invalid image size: {0:#x} (must be between 0x400000 and 0x2000000)")]
    InvalidImageSize(u64),

    #[error("Invalid growth increment: {0:#x}")]
    InvalidIncrement(u32),

    #[error("No free window of {len:#x} bytes in [{start}, {end})")]
    WindowExhausted {
        len: usize,
        start: Address,
        end: Address,
    },

    #[error("First write to image was not confirmed")]
    Cancelled,

    #[error("Invalid metadata stamp: {0}")]
    InvalidStamp(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid patch catalog: {0}")]
    InvalidCatalog(String),

    #[error("No backup found at {}", .0.display())]
    BackupMissing(PathBuf),

    #[error("Backup checksum mismatch: expected {expected}, got {actual}")]
    BackupCorrupt { expected: String, actual: String },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Operation fault: {0}")]
    Fault(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error("Invalid hex data: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl RomError {
    /// Whether the error leaves no further room to grow the image
    pub fn is_growth_refused(&self) -> bool {
        matches!(self, RomError::GrowthRefused { .. })
    }

    pub(crate) fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RomError::FileAccess {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RomError>;
