//! Contract of the FAT filesystem library.

use bitflags::bitflags;
use thiserror::Error;

use crate::drive::DriveName;
use crate::registry::FsInstance;

/// Size of the scratch buffer handed to [`FatFs::mkfs`].
pub const FORMAT_WORK_BUFFER_SIZE: usize = 4096;

/// Upper bound on the allocation unit, in sectors.
pub const MAX_ALLOCATION_UNIT_SECTORS: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no FAT filesystem on the volume")]
    NoFilesystem,
    #[error("filesystem structure error")]
    StructureError,
    #[error("fatfs result {0}")]
    Other(u32),
}

impl FsError {
    /// Mount failures that a fresh format can cure.
    pub fn is_formattable(self) -> bool {
        matches!(self, Self::NoFilesystem | Self::StructureError)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatFlags: u8 {
        const FAT = 1 << 0;
        const FAT32 = 1 << 1;
        const EXFAT = 1 << 2;
        /// Let the library pick the FAT type from the volume size.
        const ANY = Self::FAT.bits() | Self::FAT32.bits() | Self::EXFAT.bits();
        /// Super-floppy layout: no partition table.
        const SFD = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub flags: FormatFlags,
    /// Cluster size in bytes.
    pub au_size: u32,
}

/// Cluster size used when formatting: the request clamped to `[sector, 128 * sector]`.
///
/// A request of `0` therefore yields one sector per cluster.
pub fn allocation_unit_size(sector_size: u32, requested: u32) -> u32 {
    let max = sector_size.saturating_mul(MAX_ALLOCATION_UNIT_SECTORS);
    requested.clamp(sector_size, max)
}

/// FAT filesystem library bound to the drive table.
pub trait FatFs: Send + Sync {
    /// Attach `instance` to `drive`. With `delay` the volume is only probed on first access.
    fn mount(&self, instance: FsInstance, drive: DriveName, delay: bool) -> Result<(), FsError>;

    fn unmount(&self, drive: DriveName) -> Result<(), FsError>;

    fn mkfs(
        &self,
        drive: DriveName,
        options: &FormatOptions,
        work: &mut [u8],
    ) -> Result<(), FsError>;
}
