//! Validation for patch keys and recovery export names
//!
//! Patch keys are used as registry keys, catalog table names and CLI
//! arguments, so they are kept to a strict lowercase alphanumeric form.

use crate::error::{RomError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Validated patch key
///
/// # Rules
/// - Lowercase letters (a-z) and digits (0-9) only
/// - Must start with a letter
/// - Length: 1-64 characters
///
/// # Examples
///
/// ```
/// use romcart::PatchKey;
///
/// let key = PatchKey::new("musicoverride").unwrap();
/// assert_eq!(key.as_str(), "musicoverride");
///
/// assert!(PatchKey::new("Music-Override").is_err());
/// assert!(PatchKey::new("2fast").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatchKey(String);

impl PatchKey {
    const PATTERN: &'static str = r"^[a-z][a-z0-9]*$";

    const MAX_LENGTH: usize = 64;

    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(PatchKey(key))
    }

    fn validate(key: &str) -> Result<()> {
        if key.is_empty() || key.len() > Self::MAX_LENGTH {
            return Err(RomError::InvalidPatchKey(format!(
                "'{}' (length must be 1-{})",
                key,
                Self::MAX_LENGTH
            )));
        }

        let re = Regex::new(Self::PATTERN).map_err(|e| RomError::InvalidPatchKey(e.to_string()))?;
        if !re.is_match(key) {
            return Err(RomError::InvalidPatchKey(key.to_string()));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PatchKey {
    type Error = RomError;

    fn try_from(value: String) -> Result<Self> {
        PatchKey::new(value)
    }
}

impl From<PatchKey> for String {
    fn from(key: PatchKey) -> String {
        key.0
    }
}

impl AsRef<str> for PatchKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Check a sub-unit kind or ID before it becomes part of a file name
///
/// Letters, digits, `_` and `-`; must start with a letter or digit.
pub fn validate_unit_name(name: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$")
        .map_err(|e| RomError::InvalidName(e.to_string()))?;
    if !re.is_match(name) {
        return Err(RomError::InvalidName(format!(
            "'{}' must be 1-64 letters, digits, '_' or '-'",
            name
        )));
    }
    Ok(())
}
