//! Contract of the write journal installed between the FAT library and the device.

use std::fmt;
use std::sync::Arc;

use jrnl_storage::{DeviceHandle, DiskIoAdapter, StorageError, VolumeDescriptor};

use crate::config::JournalConfig;
use crate::drive::DriveSlot;

/// Opaque handle of a mounted journal instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JournalHandle(pub i32);

impl JournalHandle {
    pub const INVALID: Self = Self(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for JournalHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for JournalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the journal needs to install itself on a volume.
#[derive(Debug, Clone)]
pub struct JournalDescriptor {
    pub config: JournalConfig,
    pub drive: DriveSlot,
    pub volume: VolumeDescriptor,
    /// Sector-aligned access to the device; the journal keeps it for its whole lifetime.
    pub diskio: DiskIoAdapter,
}

pub trait Journal: Send + Sync {
    /// Install a journal on the volume. The instance starts in direct-I/O mode so the
    /// filesystem can be probed and formatted before journaling is active.
    fn mount(&self, descriptor: JournalDescriptor) -> Result<JournalHandle, StorageError>;

    fn unmount(&self, handle: JournalHandle) -> Result<(), StorageError>;

    fn set_direct_io(&self, handle: JournalHandle, enabled: bool) -> Result<(), StorageError>;

    /// The device behind a mounted journal. Unknown handles fail with
    /// [`StorageError::InvalidState`].
    fn diskio_handle(&self, handle: JournalHandle) -> Result<Arc<DeviceHandle>, StorageError>;
}
