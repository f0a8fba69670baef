use std::sync::Arc;

use jrnl_storage::{DeviceHandle, StorageError};

use crate::drive::DriveSlot;
use crate::error::Result;
use crate::fatfs::FatFs;
use crate::journal::{Journal, JournalHandle};
use crate::mount::VolumeManager;

/// What a teardown has to undo. `None` fields were never acquired.
pub(crate) struct Teardown<'a> {
    pub handle: Option<JournalHandle>,
    pub slot: Option<DriveSlot>,
    pub base_path: Option<&'a str>,
    pub device: Option<Arc<DeviceHandle>>,
}

impl<J: Journal, F: FatFs> VolumeManager<J, F> {
    /// Unmount the volume mounted by [`VolumeManager::mount_flash`].
    pub fn unmount_flash(&self, handle: &mut JournalHandle, base_path: &str) -> Result<()> {
        self.unmount(handle, base_path)
    }

    /// Unmount the volume mounted by [`VolumeManager::mount_card`]; the card and its host
    /// are released as well.
    pub fn unmount_card(&self, handle: &mut JournalHandle, base_path: &str) -> Result<()> {
        self.unmount(handle, base_path)
    }

    /// Tear a mounted volume down and invalidate `handle`.
    ///
    /// Cleanup runs to the end even when a step fails. The result is the journal's own
    /// unmount result; filesystem and registry errors on the way are logged only.
    pub fn unmount(&self, handle: &mut JournalHandle, base_path: &str) -> Result<()> {
        if !handle.is_valid() {
            return Err(StorageError::InvalidArgument("invalid journal handle").into());
        }
        if base_path.is_empty() {
            return Err(StorageError::InvalidArgument("empty base path").into());
        }
        let current = *handle;
        let device = self.journal.diskio_handle(current).map_err(|err| {
            tracing::error!(journal = %current, error = %err, "unknown journal handle");
            err
        })?;

        // Only the path registered for this volume's drive may be released.
        let slot = self
            .registry
            .slot_of(current)
            .or_else(|| self.drives.slot_of(current));
        let owned =
            slot.is_some_and(|slot| self.registry.drive_of(base_path) == Some(slot.name()));
        if !owned {
            tracing::error!(base_path, journal = %current, "base path not registered for volume");
            return Err(
                StorageError::InvalidArgument("base path does not belong to this volume").into(),
            );
        }

        let result = self.teardown(Teardown {
            handle: Some(current),
            slot,
            base_path: Some(base_path),
            device: Some(device),
        });
        if result.is_ok() {
            tracing::info!(base_path, journal = %current, "journaled FAT volume unmounted");
        }
        *handle = JournalHandle::INVALID;
        result.map_err(Into::into)
    }

    /// Undo a mount, in reverse acquisition order. Shared by unmount and mount rollback.
    pub(crate) fn teardown(&self, t: Teardown<'_>) -> std::result::Result<(), StorageError> {
        let linked = t
            .handle
            .and_then(|handle| match self.registry.unbind_journal(handle) {
                Ok(slot) => Some(slot),
                Err(err) => {
                    tracing::debug!(journal = %handle, error = %err, "no journal association");
                    None
                }
            });
        let slot = t
            .slot
            .or(linked)
            .or_else(|| t.handle.and_then(|handle| self.drives.slot_of(handle)));

        // The slot goes back to the pool before the journal is unmounted.
        if let Some(slot) = slot {
            if self.drives.journal_of(slot).is_some() {
                if let Err(err) = self.fatfs.unmount(slot.name()) {
                    tracing::warn!(drive = %slot, error = %err, "fatfs unmount failed");
                }
                if let Err(err) = self.drives.unbind(slot) {
                    tracing::warn!(drive = %slot, error = %err, "failed to unbind drive");
                }
            }
            if let Err(err) = self.drives.release(slot) {
                tracing::warn!(drive = %slot, error = %err, "failed to release drive");
            }
        }

        let result = match t.handle {
            Some(handle) => self.journal.unmount(handle).map_err(|err| {
                tracing::error!(journal = %handle, error = %err, "journal unmount failed");
                err
            }),
            None => Ok(()),
        };

        if let Some(base_path) = t.base_path {
            if let Err(err) = self.registry.unregister_path(base_path) {
                tracing::warn!(base_path, error = %err, "failed to unregister path");
            }
        }

        if let Some(device) = t.device {
            device.release();
        }
        result
    }
}
