//! Storage devices for journaled FAT volumes.
//!
//! The journal above this crate speaks byte addresses; the devices below it speak sectors.
//! This crate provides:
//!
//! - [`StorageBackend`]: sector-granular device capability, torn down on `Drop`
//! - [`DeviceHandle`]: shared owner of one initialized backend with explicit release
//! - [`DiskIoAdapter`]: the [`DiskIo`] contract handed to the journal, enforcing alignment
//! - [`CardBackend`]: SD card bring-up over an [`SdHost`] (SPI or native slot)
//! - [`FlashBackend`]: wear-levelled flash partition over a [`FlashDriver`]
//! - [`MemCardHost`] / [`MemFlash`]: RAM-backed device simulations
//!
//! Real host and flash drivers live in the board support layer.

mod backend;
mod card;
mod device;
mod diskio;
mod error;
mod flash;
mod sim;
mod util;

pub use backend::{StorageBackend, VolumeDescriptor};
pub use card::{
    CardBackend, CardInfo, CardKind, HostConfig, HostFlags, NativeSlotConfig, SdHost,
    SlotConfig, SpiDeviceConfig, SDMMC_DEFAULT_FREQ_KHZ, SDMMC_PROBING_FREQ_KHZ,
};
pub use device::DeviceHandle;
pub use diskio::{DiskIo, DiskIoAdapter};
pub use error::{ErrorKind, Result, StorageError};
pub use flash::{FlashBackend, FlashDriver, Partition, WlHandle};
pub use sim::{
    FlashEvent, HostEvent, HostFaults, MemCardHost, MemFlash, WL_METADATA_SECTORS,
};
