//! Patch installation
//!
//! The installer only performs the image edits. Running them inside a
//! transaction and updating the session's state table is the caller's job.

use crate::core::image::RomImage;
use crate::core::patch::registry::{PatchEntry, PatchRegistry};
use crate::core::patch::{PatchStateTable, PatchStatus};
use crate::core::relocator::Relocator;
use crate::core::validation::PatchKey;
use crate::error::{RomError, Result};
use tracing::{debug, info};

pub struct PatchInstaller<'a> {
    registry: &'a PatchRegistry,
}

impl<'a> PatchInstaller<'a> {
    pub fn new(registry: &'a PatchRegistry) -> Self {
        PatchInstaller { registry }
    }

    /// Precondition for installing `key`
    ///
    /// The patch must be exactly [`PatchStatus::NotApplied`] and every patch
    /// it requires must be [`PatchStatus::Applied`]. Installs are not
    /// idempotent, so an applied patch is refused rather than re-applied.
    pub fn check(&self, states: &PatchStateTable, key: &PatchKey) -> Result<&'a PatchEntry> {
        let entry = self.registry.get(key)?;

        match states.get(key) {
            PatchStatus::NotApplied => {}
            PatchStatus::Indeterminate => {
                return Err(RomError::Indeterminate {
                    key: key.to_string(),
                })
            }
            status @ PatchStatus::Applied => {
                return Err(RomError::PatchNotApplicable {
                    key: key.to_string(),
                    status,
                })
            }
        }

        for required in &entry.descriptor.requires {
            if !states.is_applied(required) {
                return Err(RomError::MissingPrerequisite {
                    key: key.to_string(),
                    requires: required.to_string(),
                });
            }
        }

        Ok(entry)
    }

    /// Write the patch bytes, then run its migrations
    ///
    /// Stops at the first error; the image may be partially written at that
    /// point and must be rolled back by the caller.
    pub fn install(
        &self,
        image: &mut RomImage,
        relocator: &Relocator<'_>,
        key: &PatchKey,
    ) -> Result<()> {
        let entry = self.registry.get(key)?;

        for write in &entry.descriptor.writes {
            image.write(write.address, &write.payload)?;
            debug!(%key, address = %write.address, len = write.payload.len(), "patch write");
        }

        for migration in &entry.migrations {
            info!("Running migration for {}: {}", key, migration.describe());
            migration.migrate(image, relocator)?;
        }

        info!(
            "Installed patch {} ({} writes, {} migrations)",
            key,
            entry.descriptor.writes.len(),
            entry.migrations.len()
        );
        Ok(())
    }
}
