//! Best-effort recovery exports
//!
//! After a sub-unit (one level, one table, ...) is saved, a structured copy
//! of it is written to `<image dir>/exports`. Export failures are logged and
//! never reach the caller: the save itself already succeeded.

use crate::core::address::Address;
use crate::core::validation::validate_unit_name;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

const EXPORT_DIR: &str = "exports";

/// One saved sub-unit, as handed to the exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubUnit {
    /// Category, e.g. `level`
    pub kind: String,
    /// Identifier within the category
    pub id: String,
    /// Where the record was placed
    pub address: Address,
    pub bytes: Vec<u8>,
}

impl SubUnit {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, address: Address, bytes: Vec<u8>) -> Self {
        SubUnit {
            kind: kind.into(),
            id: id.into(),
            address,
            bytes,
        }
    }
}

/// JSON document written for each export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryExport {
    pub kind: String,
    pub id: String,
    pub address: Address,
    pub len: usize,
    /// CRC-32 of `data`
    pub checksum: u32,
    pub exported_at: DateTime<Utc>,
    /// Hex-encoded record bytes
    pub data: String,
}

impl RecoveryExport {
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.data)?)
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryExporter {
    dir: PathBuf,
    keep: usize,
}

impl RecoveryExporter {
    /// Exporter writing under `image_dir/exports`, keeping the newest `keep`
    pub fn new<P: AsRef<Path>>(image_dir: P, keep: usize) -> Self {
        RecoveryExporter {
            dir: image_dir.as_ref().join(EXPORT_DIR),
            keep,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Export `unit`, logging instead of failing
    pub fn export(&self, unit: &SubUnit) -> Option<PathBuf> {
        match self.try_export(unit) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Recovery export of {} {} failed: {}", unit.kind, unit.id, e);
                None
            }
        }
    }

    pub fn try_export(&self, unit: &SubUnit) -> Result<PathBuf> {
        validate_unit_name(&unit.kind)?;
        validate_unit_name(&unit.id)?;
        std::fs::create_dir_all(&self.dir)?;

        let now = Utc::now();
        let document = RecoveryExport {
            kind: unit.kind.clone(),
            id: unit.id.clone(),
            address: unit.address,
            len: unit.bytes.len(),
            checksum: crc32fast::hash(&unit.bytes),
            exported_at: now,
            data: hex::encode(&unit.bytes),
        };

        let name = format!(
            "{}-{}-{}.json",
            unit.kind,
            unit.id,
            now.format("%Y%m%dT%H%M%S%3fZ")
        );
        let path = self.dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(&document)?)?;
        debug!(path = %path.display(), len = unit.bytes.len(), "wrote recovery export");

        if let Err(e) = self.prune() {
            warn!("Pruning recovery exports failed: {}", e);
        }
        Ok(path)
    }

    /// Export files, newest first
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut exports: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                let modified = entry.metadata()?.modified()?;
                exports.push((modified, path));
            }
        }

        exports.sort_by(|a, b| b.cmp(a));
        Ok(exports.into_iter().map(|(_, path)| path).collect())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecoveryExport> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Delete all but the newest `keep` exports
    pub fn prune(&self) -> Result<Vec<PathBuf>> {
        let mut deleted = Vec::new();
        for path in self.list()?.into_iter().skip(self.keep) {
            std::fs::remove_file(&path)?;
            deleted.push(path);
        }
        if !deleted.is_empty() {
            debug!(count = deleted.len(), "pruned recovery exports");
        }
        Ok(deleted)
    }
}
