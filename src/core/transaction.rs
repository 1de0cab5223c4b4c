//! Transaction wrapper for image mutations
//!
//! Every mutation runs as:
//!
//! 1. check the image file is accessible
//! 2. ask for confirmation on the image's first-ever mutation (once, durably)
//! 3. back up the whole image file
//! 4. stamp version metadata if the recorded version is older
//! 5. run the operation on the in-memory image and flush it
//!
//! The stamp is built before step 1, so a version the stamp cannot hold
//! fails before anything is backed up or written. If step 4 or 5 fails, or
//! the operation panics, the file is restored from the backup and the
//! in-memory image is replaced with the restored bytes. The caller gets the
//! original error back.

use crate::core::backup::BackupStore;
use crate::core::image::RomImage;
use crate::core::settings::ImageSettings;
use crate::core::stamp::{MetadataStamp, SIGNATURE_LEN};
use crate::error::{RomError, Result};
use parking_lot::Mutex;
use semver::Version;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

const FIRST_WRITE_PROMPT: &str =
    "This image has not been modified by this tool before. A backup is kept in the recovery directory. Continue?";

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    InProgress,
    Committed,
    RolledBack,
}

/// Accept/cancel callback for the first-mutation prompt
pub trait Confirm {
    fn confirm(&self, message: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

/// Accepts every prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Receives user-facing status lines
pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str);
}

/// Forwards status lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn status(&self, message: &str) {
        info!(target: "romcart::status", "{}", message);
    }
}

/// Keeps status lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl StatusSink for MemorySink {
    fn status(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

impl<S: StatusSink + ?Sized> StatusSink for std::sync::Arc<S> {
    fn status(&self, message: &str) {
        (**self).status(message)
    }
}

/// Version stamped into images on commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampPolicy {
    pub signature: [u8; SIGNATURE_LEN],
    pub version: Version,
}

/// One guarded mutation of an image
pub struct Transaction<'a> {
    image: &'a mut RomImage,
    store: &'a BackupStore,
    settings: &'a mut ImageSettings,
    stamp: &'a StampPolicy,
    confirm: &'a dyn Confirm,
    sink: &'a dyn StatusSink,
    state: TxState,
}

impl<'a> Transaction<'a> {
    pub fn new(
        image: &'a mut RomImage,
        store: &'a BackupStore,
        settings: &'a mut ImageSettings,
        stamp: &'a StampPolicy,
        confirm: &'a dyn Confirm,
        sink: &'a dyn StatusSink,
    ) -> Self {
        Transaction {
            image,
            store,
            settings,
            stamp,
            confirm,
            sink,
            state: TxState::Idle,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Run `op` against the image under backup protection
    pub fn run<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut RomImage) -> Result<T>,
    {
        if self.state != TxState::Idle {
            return Err(RomError::Fault(format!(
                "transaction already {:?}",
                self.state
            )));
        }

        let stamp = self.stamp_needed()?;
        self.begin()?;
        self.state = TxState::InProgress;

        let image = &mut *self.image;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<T> {
            if let Some(stamp) = &stamp {
                stamp.write(image)?;
                debug!(version = %stamp.version(), "wrote metadata stamp");
            }
            let value = op(image)?;
            image.flush()?;
            Ok(value)
        }))
        .unwrap_or_else(|payload| Err(RomError::Fault(panic_message(payload.as_ref()))));

        match outcome {
            Ok(value) => {
                self.commit(stamp.is_some());
                Ok(value)
            }
            Err(err) => {
                self.rollback(&err);
                Err(err)
            }
        }
    }

    /// Steps before any byte of the image may change
    fn begin(&mut self) -> Result<()> {
        self.image.check_accessible()?;

        if !self.settings.first_write_confirmed {
            if !self.confirm.confirm(FIRST_WRITE_PROMPT) {
                info!("First write to {} cancelled", self.image.path().display());
                return Err(RomError::Cancelled);
            }
            self.settings.first_write_confirmed = true;
            self.settings.save(self.store.dir())?;
        }

        let backup = self.store.backup(self.image.path())?;
        self.settings.last_backup = Some(backup.created_at);
        Ok(())
    }

    /// Stamp to write, if the recorded version is older than ours
    fn stamp_needed(&self) -> Result<Option<MetadataStamp>> {
        let on_image = MetadataStamp::read(&*self.image, &self.stamp.signature)
            .ok()
            .flatten()
            .map(|s| s.version());
        let recorded = self.settings.last_saved_version.clone().max(on_image);

        if recorded.as_ref().map_or(true, |v| *v < self.stamp.version) {
            MetadataStamp::new(self.stamp.signature, &self.stamp.version).map(Some)
        } else {
            Ok(None)
        }
    }

    fn commit(&mut self, stamped: bool) {
        self.state = TxState::Committed;
        if stamped {
            self.settings.last_saved_version = Some(self.stamp.version.clone());
        }
        let checksum = self.image.checksum();
        self.settings.last_checksum = Some(checksum);

        // The image itself is already flushed; losing the settings only
        // costs a repeated stamp or checksum warning next session.
        if let Err(e) = self.settings.save(self.store.dir()) {
            warn!("Failed to save image settings: {}", e);
        }
        debug!("Committed, checksum {:08x}", checksum);
        self.sink.status("Saved");
    }

    fn rollback(&mut self, err: &RomError) {
        self.state = TxState::RolledBack;
        error!(
            "Operation on {} failed, restoring backup: {:?}",
            self.image.path().display(),
            err
        );

        let restored = self
            .store
            .restore(self.image.path())
            .and_then(|bytes| self.image.replace_bytes(bytes));
        if let Err(restore_err) = restored {
            error!("Restoring backup failed: {}", restore_err);
            if let Err(reload_err) = self.image.reload() {
                error!("Reloading image failed: {}", reload_err);
            }
        }

        self.sink.status(&format!("Changes rolled back: {}", err));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}
