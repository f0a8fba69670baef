//! Mounting journaled FAT volumes.
//!
//! [`VolumeManager`] ties a storage device from `jrnl-storage` to a write journal
//! ([`Journal`]) and a FAT library ([`FatFs`]), and registers the result under a VFS base
//! path. A mount either completes or leaves no trace: no reserved drive, no registration,
//! no live device.
//!
//! - [`VolumeManager::mount_flash`] / [`VolumeManager::unmount_flash`]: wear-levelled flash
//! - [`VolumeManager::mount_card`] / [`VolumeManager::unmount_card`]: SD cards
//! - [`DriveTable`]: logical drive pool shared with the FAT library
//! - [`VfsRegistry`]: base path registrations and drive ↔ journal associations

mod config;
mod drive;
mod error;
mod fatfs;
mod journal;
mod mount;
mod registry;
mod unmount;

pub use config::{ConfigError, JournalConfig, MountConfig};
pub use drive::{DriveName, DriveSlot, DriveTable, SlotState, DEFAULT_DRIVES, MAX_DRIVES};
pub use error::{MountError, Result};
pub use fatfs::{
    allocation_unit_size, FatFs, FormatFlags, FormatOptions, FsError, FORMAT_WORK_BUFFER_SIZE,
    MAX_ALLOCATION_UNIT_SECTORS,
};
pub use journal::{Journal, JournalDescriptor, JournalHandle};
pub use mount::{MountStage, MountedVolume, VolumeManager};
pub use registry::{
    validate_base_path, FsInstance, PathEntry, Registration, RegistrySnapshot, VfsRegistry,
    MAX_BASE_PATH_LEN, MAX_REGISTERED_PATHS,
};
