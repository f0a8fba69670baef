//! Bring-up of a journaled FAT volume.
//!
//! A mount walks through [`MountStage`]s in a fixed order. The resources acquired so far
//! are tracked by a `Bringup` guard; if the walk stops anywhere before
//! [`MountStage::Ready`] the guard's `Drop` hands them to the same teardown the unmount
//! path uses, so a failed mount leaves the drive table and the registry as it found them.

use std::sync::Arc;

use jrnl_storage::{
    CardBackend, CardInfo, DeviceHandle, DiskIoAdapter, FlashBackend, FlashDriver, HostConfig,
    SdHost, SlotConfig, StorageBackend, StorageError,
};

use crate::config::{JournalConfig, MountConfig};
use crate::drive::{DriveName, DriveSlot, DriveTable};
use crate::error::{MountError, Result};
use crate::fatfs::{
    allocation_unit_size, FatFs, FormatFlags, FormatOptions, FORMAT_WORK_BUFFER_SIZE,
};
use crate::journal::{Journal, JournalDescriptor, JournalHandle};
use crate::registry::{validate_base_path, FsInstance, VfsRegistry};
use crate::unmount::Teardown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MountStage {
    Init,
    DeviceReady,
    SlotAllocated,
    JournalMounted,
    DiskIoBound,
    FsRegistered,
    FsMounted,
    DirectIoDisabled,
    Ready,
}

/// A mounted volume as listed by [`VolumeManager::volumes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountedVolume {
    pub slot: DriveSlot,
    pub drive: DriveName,
    pub journal: JournalHandle,
}

/// Mounts and unmounts journaled FAT volumes.
///
/// Owns the drive table and the VFS registry and drives the journal and FAT library
/// collaborators. Safe to share between threads; volumes on distinct drives can be mounted
/// concurrently.
pub struct VolumeManager<J, F> {
    pub(crate) journal: J,
    pub(crate) fatfs: F,
    pub(crate) drives: DriveTable,
    pub(crate) registry: VfsRegistry,
}

impl<J: Journal, F: FatFs> VolumeManager<J, F> {
    pub fn new(journal: J, fatfs: F) -> Self {
        Self::with_drives(journal, fatfs, DriveTable::default())
    }

    pub fn with_drives(journal: J, fatfs: F, drives: DriveTable) -> Self {
        Self {
            journal,
            fatfs,
            drives,
            registry: VfsRegistry::default(),
        }
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub fn fatfs(&self) -> &F {
        &self.fatfs
    }

    pub fn drives(&self) -> &DriveTable {
        &self.drives
    }

    pub fn registry(&self) -> &VfsRegistry {
        &self.registry
    }

    pub fn volumes(&self) -> Vec<MountedVolume> {
        self.registry
            .snapshot()
            .journals
            .into_iter()
            .map(|(slot, journal)| MountedVolume {
                slot,
                drive: slot.name(),
                journal,
            })
            .collect()
    }

    /// Mount a journaled FAT volume on the wear-levelled flash partition `partition_label`.
    pub fn mount_flash<D: FlashDriver + 'static>(
        &self,
        base_path: &str,
        driver: D,
        partition_label: &str,
        mount_config: &MountConfig,
        journal_config: &JournalConfig,
    ) -> Result<JournalHandle> {
        if partition_label.is_empty() {
            return Err(StorageError::InvalidArgument("empty partition label").into());
        }
        self.mount(base_path, mount_config, journal_config, || {
            FlashBackend::acquire(driver, partition_label)
        })
    }

    /// Mount a journaled FAT volume on an SD card. Returns the card's identification data
    /// along with the journal handle.
    pub fn mount_card<H: SdHost + 'static>(
        &self,
        base_path: &str,
        host: H,
        host_config: &HostConfig,
        slot_config: &SlotConfig,
        mount_config: &MountConfig,
        journal_config: &JournalConfig,
    ) -> Result<(CardInfo, JournalHandle)> {
        let mut info = None;
        let handle = self.mount(base_path, mount_config, journal_config, || {
            let card = CardBackend::acquire(host, host_config, slot_config)?;
            info = Some(card.info().clone());
            Ok(card)
        })?;
        match info {
            Some(info) => Ok((info, handle)),
            None => Err(StorageError::InvalidState("card info missing after mount").into()),
        }
    }

    /// Mount over any storage backend. `acquire` runs only after the arguments have been
    /// validated; the backend it returns is owned by the volume until unmount.
    pub fn mount<B: StorageBackend + 'static>(
        &self,
        base_path: &str,
        mount_config: &MountConfig,
        journal_config: &JournalConfig,
        acquire: impl FnOnce() -> std::result::Result<B, StorageError>,
    ) -> Result<JournalHandle> {
        validate_base_path(base_path)?;
        mount_config.validate()?;
        journal_config.validate()?;

        let mut bringup = Bringup::new(self, base_path);

        let backend = acquire().map_err(|err| bringup.fail(err))?;
        let device = Arc::new(DeviceHandle::new(backend));
        let volume = device.volume();
        bringup.device = Some(device.clone());
        bringup.advance(MountStage::DeviceReady);

        let slot = self.drives.allocate().map_err(|err| bringup.fail(err))?;
        bringup.slot = Some(slot);
        bringup.advance(MountStage::SlotAllocated);
        let drive = slot.name();

        let handle = self
            .journal
            .mount(JournalDescriptor {
                config: journal_config.clone(),
                drive: slot,
                volume,
                diskio: DiskIoAdapter::new(device),
            })
            .map_err(|err| bringup.fail(err))?;
        bringup.handle = Some(handle);
        bringup.advance(MountStage::JournalMounted);

        self.drives
            .bind(slot, handle)
            .map_err(|err| bringup.fail(err))?;
        bringup.advance(MountStage::DiskIoBound);

        let registration = self
            .registry
            .register_path(base_path, drive, mount_config.max_files)
            .map_err(|err| bringup.fail(err))?;
        bringup.registered = true;
        self.registry
            .bind_journal(slot, handle)
            .map_err(|err| bringup.fail(err))?;
        bringup.advance(MountStage::FsRegistered);

        self.mount_filesystem(
            registration.instance(),
            drive,
            mount_config,
            journal_config,
            volume.sector_size,
        )
        .map_err(|err| bringup.fail(err))?;
        bringup.advance(MountStage::FsMounted);

        self.journal
            .set_direct_io(handle, false)
            .map_err(|err| bringup.fail(err))?;
        bringup.advance(MountStage::DirectIoDisabled);

        bringup.advance(MountStage::Ready);
        tracing::info!(base_path, %drive, journal = %handle, "journaled FAT volume mounted");
        Ok(handle)
    }

    fn mount_filesystem(
        &self,
        instance: FsInstance,
        drive: DriveName,
        mount_config: &MountConfig,
        journal_config: &JournalConfig,
        sector_size: u32,
    ) -> Result<()> {
        if !journal_config.force_fs_format {
            match self.fatfs.mount(instance, drive, false) {
                Ok(()) => return Ok(()),
                Err(code) if code.is_formattable() && mount_config.format_if_mount_failed => {
                    tracing::warn!(%drive, error = %code, "no usable filesystem, formatting");
                }
                Err(code) => return Err(MountError::Filesystem { op: "mount", code }),
            }
        }

        let mut work = Vec::<u8>::new();
        work.try_reserve_exact(FORMAT_WORK_BUFFER_SIZE)
            .map_err(|_| StorageError::ResourceExhausted("format work buffer"))?;
        work.resize(FORMAT_WORK_BUFFER_SIZE, 0u8);

        let options = FormatOptions {
            flags: FormatFlags::ANY | FormatFlags::SFD,
            au_size: allocation_unit_size(sector_size, mount_config.allocation_unit_size),
        };
        tracing::debug!(%drive, au_size = options.au_size, "formatting volume");
        let formatted = self.fatfs.mkfs(drive, &options, &mut work);
        drop(work);
        formatted.map_err(|code| MountError::Filesystem { op: "mkfs", code })?;

        self.fatfs
            .mount(instance, drive, true)
            .map_err(|code| MountError::Filesystem { op: "mount", code })
    }
}

/// Resources held by a mount in progress.
struct Bringup<'a, J: Journal, F: FatFs> {
    manager: &'a VolumeManager<J, F>,
    base_path: &'a str,
    stage: MountStage,
    device: Option<Arc<DeviceHandle>>,
    slot: Option<DriveSlot>,
    handle: Option<JournalHandle>,
    registered: bool,
}

impl<'a, J: Journal, F: FatFs> Bringup<'a, J, F> {
    fn new(manager: &'a VolumeManager<J, F>, base_path: &'a str) -> Self {
        Self {
            manager,
            base_path,
            stage: MountStage::Init,
            device: None,
            slot: None,
            handle: None,
            registered: false,
        }
    }

    fn advance(&mut self, stage: MountStage) {
        tracing::debug!(base_path = self.base_path, ?stage, "mount stage reached");
        self.stage = stage;
    }

    fn fail(&self, err: impl Into<MountError>) -> MountError {
        let err = err.into();
        tracing::error!(
            base_path = self.base_path,
            stage = ?self.stage,
            error = %err,
            "mount failed"
        );
        err
    }
}

impl<J: Journal, F: FatFs> Drop for Bringup<'_, J, F> {
    fn drop(&mut self) {
        if self.stage == MountStage::Ready {
            return;
        }
        tracing::debug!(base_path = self.base_path, stage = ?self.stage, "rolling back mount");
        let teardown = Teardown {
            handle: self.handle.take(),
            slot: self.slot.take(),
            base_path: self.registered.then_some(self.base_path),
            device: self.device.take(),
        };
        // The caller gets the first failure; teardown problems are only logged.
        if let Err(err) = self.manager.teardown(teardown) {
            tracing::warn!(error = %err, "journal unmount failed during rollback");
        }
    }
}
