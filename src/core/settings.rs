//! Session configuration and durable per-image settings
//!
//! - [`SessionConfig`] is read from TOML and controls allocation, growth and
//!   where recovery data lives.
//! - [`ImageSettings`] is JSON stored in an image's recovery directory and
//!   survives between sessions (first-write confirmation, last saved version).

use crate::core::allocator::scan::DEFAULT_ALIGNMENT;
use crate::core::growth::{is_whole_increment, GROWTH_STEP};
use crate::core::image::MAX_IMAGE_SIZE;
use crate::core::stamp::{MetadataStamp, DEFAULT_SIGNATURE, SIGNATURE_LEN};
use crate::error::{RomError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

/// Session configuration
///
/// # Example
///
/// ```toml
/// recovery_root = "/var/lib/romcart"
/// growth_step = 1048576
/// free_marker = 0
/// alignment = 4
/// keep_exports = 32
/// signature = "ROMCART "
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Parent of all per-image recovery directories
    pub recovery_root: PathBuf,

    /// Bytes appended per growth step
    pub growth_step: u32,

    /// Byte value that marks unused space
    pub free_marker: u8,

    /// Alignment of placed records
    pub alignment: u32,

    /// Recovery exports kept per image
    pub keep_exports: usize,

    /// 8-character ASCII signature of the metadata stamp
    pub signature: String,

    /// Version stamped into saved images (defaults to the crate version)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            recovery_root: PathBuf::from(".romcart"),
            growth_step: GROWTH_STEP,
            free_marker: 0x00,
            alignment: DEFAULT_ALIGNMENT,
            keep_exports: 32,
            signature: String::from_utf8_lossy(&DEFAULT_SIGNATURE).into_owned(),
            version: None,
        }
    }
}

impl SessionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| RomError::file_access(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config with everything defaulted except the recovery root
    pub fn with_recovery_root<P: Into<PathBuf>>(root: P) -> Self {
        SessionConfig {
            recovery_root: root.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_whole_increment(self.growth_step) || self.growth_step > MAX_IMAGE_SIZE {
            return Err(RomError::InvalidConfig(format!(
                "growth_step {:#x} must be a multiple of {:#x} no larger than {:#x}",
                self.growth_step, GROWTH_STEP, MAX_IMAGE_SIZE
            )));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(RomError::InvalidConfig(format!(
                "alignment {} must be a power of two",
                self.alignment
            )));
        }
        if self.signature.len() != SIGNATURE_LEN || !self.signature.is_ascii() {
            return Err(RomError::InvalidConfig(format!(
                "signature {:?} must be exactly {} ASCII characters",
                self.signature, SIGNATURE_LEN
            )));
        }
        // The stamp stores each version component in 16 bits
        MetadataStamp::new(self.signature_bytes(), &self.running_version()?)
            .map_err(|e| RomError::InvalidConfig(format!("stamp: {}", e)))?;
        Ok(())
    }

    pub fn signature_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut bytes = [b' '; SIGNATURE_LEN];
        for (dst, src) in bytes.iter_mut().zip(self.signature.bytes()) {
            *dst = src;
        }
        bytes
    }

    /// Version written into the metadata stamp
    pub fn running_version(&self) -> Result<Version> {
        let text = self.version.as_deref().unwrap_or(crate::VERSION);
        Ok(Version::parse(text)?)
    }
}

/// Settings remembered for one image between sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// User accepted the first-mutation prompt
    #[serde(default)]
    pub first_write_confirmed: bool,

    /// Version of the last successful save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved_version: Option<Version>,

    /// CRC-32 of the image after the last successful save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checksum: Option<u32>,

    /// Time of the last backup (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<String>,
}

impl ImageSettings {
    /// Load from `dir`, or defaults if nothing was saved yet
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(ImageSettings::default());
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.as_ref().join(SETTINGS_FILE), json)?;
        Ok(())
    }
}
