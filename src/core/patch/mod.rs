//! Optional feature patches
//!
//! A patch is a fixed list of verbatim byte writes plus optional data
//! migration. Each registered patch has three parts, resolved once when the
//! registry is built:
//! - [`PatchDescriptor`] - key, display name, description, writes
//! - a [`Detector`] - classifies the image as not applied / applied /
//!   indeterminate
//! - zero or more [`Migration`]s run after the writes

pub mod installer;
pub mod migration;
pub mod registry;
pub mod signature;

use crate::core::address::Address;
use crate::core::image::RomImage;
use crate::core::relocator::Relocator;
use crate::core::validation::PatchKey;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use installer::PatchInstaller;
pub use migration::MigrationStep;
pub use registry::{PatchEntry, PatchRegistry};
pub use signature::{Matcher, Signature};

/// Detected state of a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    NotApplied,
    Applied,
    Indeterminate,
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PatchStatus::NotApplied => "not applied",
            PatchStatus::Applied => "applied",
            PatchStatus::Indeterminate => "indeterminate",
        };
        f.pad(text)
    }
}

/// One verbatim write of a patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchWrite {
    pub address: Address,
    pub payload: Vec<u8>,
}

/// Static description of a patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDescriptor {
    pub key: PatchKey,
    pub name: String,
    pub description: String,
    /// Applied in order
    pub writes: Vec<PatchWrite>,
    /// Patches that must already be applied
    #[serde(default)]
    pub requires: Vec<PatchKey>,
}

/// Classifies an image for one patch; must not modify it
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RomImage) -> PatchStatus;
}

/// Data migration run after a patch's writes
pub trait Migration: Send + Sync {
    fn migrate(&self, image: &mut RomImage, relocator: &Relocator<'_>) -> Result<()>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Patch state of the loaded image, keyed by patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchStateTable(BTreeMap<PatchKey, PatchStatus>);

impl PatchStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown keys are reported as indeterminate
    pub fn get(&self, key: &PatchKey) -> PatchStatus {
        self.0
            .get(key)
            .copied()
            .unwrap_or(PatchStatus::Indeterminate)
    }

    pub fn set(&mut self, key: PatchKey, status: PatchStatus) {
        self.0.insert(key, status);
    }

    pub fn is_applied(&self, key: &PatchKey) -> bool {
        self.get(key) == PatchStatus::Applied
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PatchKey, PatchStatus)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
