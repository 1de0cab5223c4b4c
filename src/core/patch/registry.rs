//! Patch registry
//!
//! Maps each patch key to its descriptor, detector and migrations. Catalogs
//! are TOML documents; the built-in catalog is compiled into the crate and
//! parsed once when the registry is created.

use crate::core::address::Address;
use crate::core::image::{RomImage, MAX_IMAGE_SIZE};
use crate::core::patch::migration::MigrationStep;
use crate::core::patch::signature::{parse_hex_bytes, parse_pattern, Matcher, Signature};
use crate::core::patch::{
    Detector, Migration, PatchDescriptor, PatchStateTable, PatchWrite,
};
use crate::core::validation::PatchKey;
use crate::error::{RomError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Catalog shipped with the crate
pub const BUILTIN_CATALOG: &str = include_str!("../../../patches/builtin.toml");

/// Descriptor, detector and migrations of one patch
pub struct PatchEntry {
    pub descriptor: PatchDescriptor,
    pub detector: Box<dyn Detector>,
    pub migrations: Vec<Box<dyn Migration>>,
}

impl std::fmt::Debug for PatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchEntry")
            .field("descriptor", &self.descriptor)
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct PatchRegistry {
    entries: BTreeMap<PatchKey, PatchEntry>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in catalog
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut registry = Self::new();
        registry.extend_from_file(path)?;
        Ok(registry)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut registry = Self::new();
        registry.extend_from_toml_str(text)?;
        Ok(registry)
    }

    pub fn extend_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| RomError::file_access(path, e))?;
        self.extend_from_toml_str(&text)
    }

    /// Add every patch of a TOML catalog
    pub fn extend_from_toml_str(&mut self, text: &str) -> Result<()> {
        let catalog: RawCatalog = toml::from_str(text)?;
        for raw in catalog.patch {
            let entry = raw.into_entry()?;
            self.register(entry)?;
        }
        self.check_requirements()
    }

    /// Add one patch; keys must be unique
    pub fn register(&mut self, entry: PatchEntry) -> Result<()> {
        let key = entry.descriptor.key.clone();
        for write in &entry.descriptor.writes {
            check_in_bounds(&key, write.address, write.payload.len())?;
        }
        if self.entries.contains_key(&key) {
            return Err(RomError::InvalidCatalog(format!(
                "patch '{}' registered twice",
                key
            )));
        }
        debug!(%key, writes = entry.descriptor.writes.len(), "registered patch");
        self.entries.insert(key, entry);
        Ok(())
    }

    fn check_requirements(&self) -> Result<()> {
        for (key, entry) in &self.entries {
            for required in &entry.descriptor.requires {
                if required == key || !self.entries.contains_key(required) {
                    return Err(RomError::InvalidCatalog(format!(
                        "patch '{}' requires unknown patch '{}'",
                        key, required
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &PatchKey) -> Result<&PatchEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| RomError::UnknownPatch(key.to_string()))
    }

    /// Look up by string key
    pub fn find(&self, key: &str) -> Result<&PatchEntry> {
        let key = PatchKey::new(key).map_err(|_| RomError::UnknownPatch(key.to_string()))?;
        self.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PatchKey> {
        self.entries.keys()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PatchDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify every registered patch; reads only
    pub fn detect_all(&self, image: &RomImage) -> PatchStateTable {
        let mut states = PatchStateTable::new();
        for (key, entry) in &self.entries {
            let status = entry.detector.detect(image);
            debug!(%key, %status, "detected patch state");
            states.set(key.clone(), status);
        }
        states
    }
}

fn check_in_bounds(key: &PatchKey, address: Address, len: usize) -> Result<()> {
    let end = address.checked_add(len);
    let limit = Address::from_offset(MAX_IMAGE_SIZE as usize);
    if address < Address::ORIGIN || end.map_or(true, |end| end > limit) {
        return Err(RomError::InvalidCatalog(format!(
            "patch '{}' writes {} bytes at {}, outside the cartridge space",
            key, len, address
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    #[serde(default)]
    patch: Vec<RawPatch>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatch {
    key: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    requires: Vec<String>,
    signature: RawSignature,
    #[serde(default)]
    writes: Vec<RawWrite>,
    #[serde(default)]
    migrations: Vec<MigrationStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSignature {
    address: Address,
    unpatched: RawMatcher,
    patched: RawMatcher,
}

/// Exactly one of `exact`, `pattern` or `mask` (+ `value`)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatcher {
    exact: Option<String>,
    pattern: Option<String>,
    mask: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWrite {
    address: Address,
    bytes: String,
}

impl RawMatcher {
    fn into_matcher(self) -> Result<Matcher> {
        match (self.exact, self.pattern, self.mask, self.value) {
            (Some(exact), None, None, None) => Ok(Matcher::Exact(parse_hex_bytes(&exact)?)),
            (None, Some(pattern), None, None) => Ok(Matcher::Pattern(parse_pattern(&pattern)?)),
            (None, None, Some(mask), Some(value)) => {
                Matcher::mask(parse_hex_bytes(&mask)?, parse_hex_bytes(&value)?)
            }
            _ => Err(RomError::InvalidCatalog(
                "matcher needs exactly one of: exact, pattern, mask + value".to_string(),
            )),
        }
    }
}

impl RawPatch {
    fn into_entry(self) -> Result<PatchEntry> {
        let key = PatchKey::new(self.key)?;
        let requires = self
            .requires
            .into_iter()
            .map(PatchKey::new)
            .collect::<Result<Vec<_>>>()?;

        let signature = Signature::new(
            self.signature.address,
            self.signature.unpatched.into_matcher()?,
            self.signature.patched.into_matcher()?,
        )?;

        let writes = self
            .writes
            .into_iter()
            .map(|w| {
                Ok(PatchWrite {
                    address: w.address,
                    payload: parse_hex_bytes(&w.bytes)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if writes.is_empty() {
            return Err(RomError::InvalidCatalog(format!(
                "patch '{}' has no writes",
                key
            )));
        }

        let mut migrations: Vec<Box<dyn Migration>> = Vec::with_capacity(self.migrations.len());
        for step in self.migrations {
            step.validate()?;
            migrations.push(Box::new(step));
        }

        Ok(PatchEntry {
            descriptor: PatchDescriptor {
                key,
                name: self.name,
                description: self.description,
                writes,
                requires,
            },
            detector: Box::new(signature),
            migrations,
        })
    }
}
