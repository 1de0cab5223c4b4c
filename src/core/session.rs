//! Editing session over one cartridge image
//!
//! A [`RomSession`] owns everything that used to be process-wide state: the
//! loaded image, its patch states, and its recovery directory. It has an
//! explicit open/close lifecycle; after [`RomSession::close`] every operation
//! returns [`RomError::SessionClosed`].
//!
//! All mutating operations go through a [`Transaction`], so a failure at any
//! point leaves the image file exactly as it was before the call.

use crate::core::address::{ByteRange, PointerRef, PointerValue, Window};
use crate::core::allocator::Allocator;
use crate::core::backup::{BackupMetadata, BackupStore};
use crate::core::growth::GrowthManager;
use crate::core::image::RomImage;
use crate::core::patch::{PatchInstaller, PatchRegistry, PatchStateTable, PatchStatus};
use crate::core::recovery::{RecoveryExporter, SubUnit};
use crate::core::relocator::{PointerTable, Relocator};
use crate::core::settings::{ImageSettings, SessionConfig};
use crate::core::transaction::{
    AutoConfirm, Confirm, StampPolicy, StatusSink, TracingSink, Transaction,
};
use crate::core::validation::PatchKey;
use crate::error::{RomError, Result};
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

/// Builder for [`RomSession`]
///
/// # Examples
///
/// ```rust,no_run
/// use romcart::{SessionBuilder, SessionConfig};
///
/// # fn main() -> romcart::Result<()> {
/// let session = SessionBuilder::new()
///     .config(SessionConfig::with_recovery_root("/tmp/romcart"))
///     .confirm(|prompt: &str| {
///         println!("{}", prompt);
///         true
///     })
///     .open("game.gba")?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    config: SessionConfig,
    registry: Option<PatchRegistry>,
    confirm: Box<dyn Confirm>,
    sink: Box<dyn StatusSink>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        SessionBuilder {
            config: SessionConfig::default(),
            registry: None,
            confirm: Box::new(AutoConfirm),
            sink: Box::new(TracingSink),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `registry` instead of the built-in catalog
    pub fn registry(mut self, registry: PatchRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Callback for the first-mutation prompt (default: accept)
    pub fn confirm<C: Confirm + 'static>(mut self, confirm: C) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn sink<S: StatusSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<RomSession> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => PatchRegistry::builtin()?,
        };
        RomSession::open_with(path, self.config, registry, self.confirm, self.sink)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RomSession {
    config: SessionConfig,
    registry: PatchRegistry,
    allocator: Allocator,
    growth: GrowthManager,
    store: BackupStore,
    settings: ImageSettings,
    states: PatchStateTable,
    exporter: RecoveryExporter,
    stamp: StampPolicy,
    confirm: Box<dyn Confirm>,
    sink: Box<dyn StatusSink>,
    image: Option<RomImage>,
}

impl RomSession {
    /// Open with the built-in catalog, auto-confirm and tracing status
    pub fn open<P: AsRef<Path>>(path: P, config: SessionConfig) -> Result<Self> {
        SessionBuilder::new().config(config).open(path)
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        config: SessionConfig,
        registry: PatchRegistry,
        confirm: Box<dyn Confirm>,
        sink: Box<dyn StatusSink>,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();

        let image = RomImage::load(path)?;
        let store = BackupStore::for_image(&config.recovery_root, path)?;
        let settings = ImageSettings::load(store.dir())?;

        if let Some(saved) = settings.last_checksum {
            if saved != image.checksum() {
                warn!(
                    "{} changed since it was last saved here (checksum {:08x}, now {:08x})",
                    path.display(),
                    saved,
                    image.checksum()
                );
            }
        }

        // Patch code areas are never handed out as free space
        let mut allocator = Allocator::with_marker(config.free_marker, config.alignment);
        for descriptor in registry.descriptors() {
            for write in &descriptor.writes {
                allocator.reserve(ByteRange::new(write.address, write.payload.len()));
            }
        }

        let growth = GrowthManager::new(config.growth_step)?;
        let states = registry.detect_all(&image);
        let exporter = RecoveryExporter::new(store.dir(), config.keep_exports);
        let stamp = StampPolicy {
            signature: config.signature_bytes(),
            version: config.running_version()?,
        };

        info!(
            "Opened {} ({:#x} bytes, {} patches known)",
            path.display(),
            image.size(),
            registry.len()
        );

        Ok(RomSession {
            config,
            registry,
            allocator,
            growth,
            store,
            settings,
            states,
            exporter,
            stamp,
            confirm,
            sink,
            image: Some(image),
        })
    }

    pub fn is_open(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Result<&RomImage> {
        self.image.as_ref().ok_or(RomError::SessionClosed)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    /// Per-image recovery directory
    pub fn recovery_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn exporter(&self) -> &RecoveryExporter {
        &self.exporter
    }

    /// Patch states as of the last detection
    pub fn patch_states(&self) -> &PatchStateTable {
        &self.states
    }

    /// Re-run detection for every registered patch
    pub fn detect_patches(&mut self) -> Result<PatchStateTable> {
        let image = self.image.as_ref().ok_or(RomError::SessionClosed)?;
        self.states = self.registry.detect_all(image);
        Ok(self.states.clone())
    }

    /// Whether an optional feature is enabled in this image
    ///
    /// Saves that depend on a feature must call this first: an
    /// indeterminate state is an error, never silently treated as on or off.
    pub fn require_feature(&self, key: &str) -> Result<bool> {
        self.image()?;
        let key = self.known_key(key)?;
        match self.states.get(&key) {
            PatchStatus::Applied => Ok(true),
            PatchStatus::NotApplied => Ok(false),
            PatchStatus::Indeterminate => Err(RomError::Indeterminate {
                key: key.to_string(),
            }),
        }
    }

    /// Range of the record `pointer` currently references
    ///
    /// The range is claimed as a live record: placements skip it until it
    /// is passed back as an old range and released.
    pub fn capture(&self, pointer: PointerRef, len: usize) -> Result<Option<ByteRange>> {
        let range = Relocator::capture(self.image()?, pointer, len)?;
        if let Some(range) = range {
            self.allocator.claim(range);
        }
        Ok(range)
    }

    /// Run `op` as one transaction
    pub fn transact<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut RomImage, &Relocator<'_>) -> Result<T>,
    {
        let image = self.image.as_mut().ok_or(RomError::SessionClosed)?;
        let claims = self.allocator.claimed();
        let relocator = Relocator::new(&self.allocator, &self.growth);
        let mut tx = Transaction::new(
            image,
            &self.store,
            &mut self.settings,
            &self.stamp,
            &*self.confirm,
            &*self.sink,
        );
        let result = tx.run(|image| op(image, &relocator));
        if result.is_err() {
            // The image was rolled back, so were its records
            self.allocator.restore_claims(claims);
        }
        result
    }

    /// Erase `old_ranges`, place `data` and repoint `refs` at it
    pub fn save_record(
        &mut self,
        old_ranges: &[ByteRange],
        data: &[u8],
        refs: &[PointerRef],
        window: Window,
    ) -> Result<PointerValue> {
        self.transact(|image, relocator| {
            relocator.save_record(image, old_ranges, data, refs, window)
        })
    }

    /// [`save_record`](Self::save_record), then export a recovery copy
    pub fn save_unit(
        &mut self,
        unit: (&str, &str),
        old_ranges: &[ByteRange],
        data: &[u8],
        refs: &[PointerRef],
        window: Window,
    ) -> Result<PointerValue> {
        let result = self.save_record(old_ranges, data, refs, window)?;
        if let PointerValue::At(address) = result {
            let (kind, id) = unit;
            self.exporter
                .export(&SubUnit::new(kind, id, address, data.to_vec()));
        }
        Ok(result)
    }

    /// Write `table`, relocating it if its length changed
    pub fn save_table(
        &mut self,
        old: Option<ByteRange>,
        table: &PointerTable,
        refs: &[PointerRef],
        window: Window,
    ) -> Result<PointerValue> {
        self.transact(|image, relocator| relocator.rebuild_table(image, old, table, refs, window))
    }

    /// Grow the image by `increment` bytes (clamped to the ceiling)
    pub fn expand(&mut self, increment: u32) -> Result<u32> {
        let growth = self.growth;
        self.transact(|image, _| growth.expand(image, increment))
    }

    /// Install a patch; `false` if refused or rolled back
    ///
    /// The reason is logged and sent to the status sink.
    pub fn apply_patch(&mut self, key: &str) -> bool {
        match self.try_apply_patch(key) {
            Ok(()) => true,
            Err(e) => {
                warn!("Patch {} not applied: {}", key, e);
                self.sink.status(&e.to_string());
                false
            }
        }
    }

    pub fn try_apply_patch(&mut self, key: &str) -> Result<()> {
        self.image()?;
        let key = self.known_key(key)?;

        // Refusals happen before the transaction: no backup, no writes
        PatchInstaller::new(&self.registry).check(&self.states, &key)?;

        let image = self.image.as_mut().ok_or(RomError::SessionClosed)?;
        let claims = self.allocator.claimed();
        let relocator = Relocator::new(&self.allocator, &self.growth);
        let installer = PatchInstaller::new(&self.registry);
        let installed = Transaction::new(
            image,
            &self.store,
            &mut self.settings,
            &self.stamp,
            &*self.confirm,
            &*self.sink,
        )
        .run(|image| installer.install(image, &relocator, &key));
        if let Err(e) = installed {
            self.allocator.restore_claims(claims);
            return Err(e);
        }

        self.states.set(key.clone(), PatchStatus::Applied);

        if let Ok(entry) = self.registry.get(&key) {
            let detected = entry.detector.detect(self.image()?);
            if detected != PatchStatus::Applied {
                warn!("Patch {} installed but detects as {}", key, detected);
            }
            self.sink.status(&format!("Applied {}", entry.descriptor.name));
        }
        Ok(())
    }

    /// Refresh the backup copy without changing the image
    pub fn backup(&mut self) -> Result<BackupMetadata> {
        let image = self.image.as_ref().ok_or(RomError::SessionClosed)?;
        image.check_accessible()?;
        let metadata = self.store.backup(image.path())?;
        self.settings.last_backup = Some(metadata.created_at.clone());
        self.settings.save(self.store.dir())?;
        Ok(metadata)
    }

    /// Replace the image with the backup copy and re-detect patches
    pub fn restore(&mut self) -> Result<()> {
        let image = self.image.as_mut().ok_or(RomError::SessionClosed)?;
        let bytes = self.store.restore(image.path())?;
        image.replace_bytes(bytes)?;

        self.settings.last_checksum = Some(image.checksum());
        self.settings.save(self.store.dir())?;
        self.states = self.registry.detect_all(image);
        self.sink
            .status(&format!("Restored backup at {}", Utc::now().to_rfc3339()));
        Ok(())
    }

    /// Release the image; later calls fail with `SessionClosed`
    pub fn close(&mut self) -> Result<()> {
        let image = self.image.take().ok_or(RomError::SessionClosed)?;
        self.settings.save(self.store.dir())?;
        info!("Closed {}", image.path().display());
        Ok(())
    }

    fn known_key(&self, key: &str) -> Result<PatchKey> {
        Ok(self.registry.find(key)?.descriptor.key.clone())
    }
}
