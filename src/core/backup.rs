//! Whole-image backup copies
//!
//! Every image gets its own recovery directory. A backup is a byte-identical
//! copy of the image file plus a small JSON sidecar carrying its size and
//! SHA-256 digest, so a restore can refuse a damaged copy.

use crate::error::{RomError, Result};
use chrono::Utc;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BACKUP_FILE: &str = "backup.bin";
const METADATA_FILE: &str = "backup.json";

/// Sidecar describing the current backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Image the backup was taken from
    pub image_path: PathBuf,

    /// Size in bytes
    pub size: u64,

    /// Hex SHA-256 of the backup bytes
    pub sha256: String,

    /// Creation time (RFC 3339)
    pub created_at: String,
}

/// Backup storage for one image
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// Use `dir` as the recovery directory, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(BackupStore { dir })
    }

    /// Recovery directory of `image_path` under `recovery_root`
    pub fn for_image<P: AsRef<Path>, Q: AsRef<Path>>(recovery_root: P, image_path: Q) -> Result<Self> {
        Self::new(image_dir(recovery_root.as_ref(), image_path.as_ref()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    pub fn exists(&self) -> bool {
        self.backup_path().exists() && self.dir.join(METADATA_FILE).exists()
    }

    /// Copy the image file into the store, replacing any previous backup
    pub fn backup<P: AsRef<Path>>(&self, image_path: P) -> Result<BackupMetadata> {
        let image_path = image_path.as_ref();
        let target = self.backup_path();

        let size = std::fs::copy(image_path, &target)
            .map_err(|e| RomError::file_access(image_path, e))?;

        let metadata = BackupMetadata {
            image_path: image_path.to_path_buf(),
            size,
            sha256: digest_file(&target)?,
            created_at: Utc::now().to_rfc3339(),
        };

        let json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(self.dir.join(METADATA_FILE), json)?;

        info!(
            "Backed up {} ({} bytes) to {}",
            image_path.display(),
            size,
            target.display()
        );
        Ok(metadata)
    }

    pub fn metadata(&self) -> Result<BackupMetadata> {
        let path = self.dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(RomError::BackupMissing(path));
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Read the backup bytes after checking them against the sidecar digest
    pub fn load(&self) -> Result<Vec<u8>> {
        let metadata = self.metadata()?;
        let path = self.backup_path();
        if !path.exists() {
            return Err(RomError::BackupMissing(path));
        }

        let bytes = std::fs::read(&path)?;
        let actual = format!("{:x}", Sha256::digest(&bytes));
        if actual != metadata.sha256 {
            return Err(RomError::BackupCorrupt {
                expected: metadata.sha256,
                actual,
            });
        }
        Ok(bytes)
    }

    /// Write the backup over `image_path`; returns the restored bytes
    pub fn restore<P: AsRef<Path>>(&self, image_path: P) -> Result<Vec<u8>> {
        let image_path = image_path.as_ref();
        let bytes = self.load()?;

        std::fs::write(image_path, &bytes).map_err(|e| RomError::file_access(image_path, e))?;

        info!(
            "Restored {} ({} bytes) from backup",
            image_path.display(),
            bytes.len()
        );
        Ok(bytes)
    }
}

/// `<root>/<file stem>-<xxh3 of the canonical path>`
pub fn image_dir(recovery_root: &Path, image_path: &Path) -> PathBuf {
    let canonical = image_path
        .canonicalize()
        .unwrap_or_else(|_| image_path.to_path_buf());
    let key = xxhash_rust::xxh3::xxh3_64(canonical.to_string_lossy().as_bytes());
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let dir = recovery_root.join(format!("{}-{:016x}", stem, key));
    debug!(dir = %dir.display(), "recovery directory");
    dir
}

/// Hex SHA-256 of a file, hashed through a read-only mapping
pub fn digest_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| RomError::file_access(path, e))?;
    if file.metadata()?.len() == 0 {
        return Ok(format!("{:x}", Sha256::digest(b"")));
    }
    // SAFETY: the mapping is read-only and dropped before this function
    // returns; nothing else writes the file while it is hashed.
    let map = unsafe { Mmap::map(&file)? };
    Ok(format!("{:x}", Sha256::digest(&map[..])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_image(dir: &Path, fill: u8) -> PathBuf {
        let path = dir.join("game.gba");
        std::fs::write(&path, vec![fill; 0x1000]).unwrap();
        path
    }

    #[test]
    fn test_backup_and_restore() {
        let temp = TempDir::new().unwrap();
        let image = write_image(temp.path(), 0x11);
        let store = BackupStore::for_image(temp.path().join("recovery"), &image).unwrap();

        let metadata = store.backup(&image).unwrap();
        assert_eq!(metadata.size, 0x1000);
        assert!(store.exists());

        std::fs::write(&image, vec![0x22; 0x2000]).unwrap();
        let restored = store.restore(&image).unwrap();

        assert_eq!(restored, vec![0x11; 0x1000]);
        assert_eq!(std::fs::read(&image).unwrap(), vec![0x11; 0x1000]);
    }

    #[test]
    fn test_backup_overwrites_previous() {
        let temp = TempDir::new().unwrap();
        let image = write_image(temp.path(), 0x11);
        let store = BackupStore::new(temp.path().join("recovery")).unwrap();

        store.backup(&image).unwrap();
        std::fs::write(&image, vec![0x33; 0x1000]).unwrap();
        store.backup(&image).unwrap();

        assert_eq!(store.load().unwrap(), vec![0x33; 0x1000]);
    }

    #[test]
    fn test_corrupt_backup_rejected() {
        let temp = TempDir::new().unwrap();
        let image = write_image(temp.path(), 0x11);
        let store = BackupStore::new(temp.path().join("recovery")).unwrap();
        store.backup(&image).unwrap();

        std::fs::write(store.backup_path(), vec![0x00; 0x1000]).unwrap();

        assert!(matches!(
            store.restore(&image),
            Err(RomError::BackupCorrupt { .. })
        ));
        // Image left untouched
        assert_eq!(std::fs::read(&image).unwrap(), vec![0x11; 0x1000]);
    }

    #[test]
    fn test_missing_backup() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("recovery")).unwrap();

        assert!(!store.exists());
        assert!(matches!(store.load(), Err(RomError::BackupMissing(_))));
    }

    #[test]
    fn test_image_dirs_are_distinct_per_image() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a").join("game.gba");
        let b = temp.path().join("b").join("game.gba");

        let dir_a = image_dir(temp.path(), &a);
        let dir_b = image_dir(temp.path(), &b);

        assert_ne!(dir_a, dir_b);
        assert!(dir_a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("game-"));
    }
}
