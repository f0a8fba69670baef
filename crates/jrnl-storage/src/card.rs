//! SD/MMC card bring-up on top of a host driver.
//!
//! [`CardBackend::acquire`] runs the host-bus init, slot init and card identification
//! sequence. Every step that succeeded is recorded in a `CardLease`; dropping the lease
//! undoes exactly those steps, so a failed acquisition and a normal release share the
//! same teardown path.

use bitflags::bitflags;

use crate::util::is_supported_sector_size;
use crate::{Result, StorageBackend, StorageError};

bitflags! {
    /// Host capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HostFlags: u32 {
        /// Card is attached through an SPI bus rather than a native SD/MMC controller slot.
        const SPI = 1 << 0;
        const BUS_WIDTH_1 = 1 << 1;
        const BUS_WIDTH_4 = 1 << 2;
        const BUS_WIDTH_8 = 1 << 3;
        const DDR = 1 << 4;
    }
}

pub const SDMMC_DEFAULT_FREQ_KHZ: u32 = 20_000;
pub const SDMMC_PROBING_FREQ_KHZ: u32 = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub flags: HostFlags,
    /// Controller slot (native) or SPI host id (SPI).
    pub slot: u32,
    pub max_freq_khz: u32,
}

impl HostConfig {
    /// Native SD/MMC controller, slot 1, 4-bit bus.
    pub fn sdmmc() -> Self {
        Self {
            flags: HostFlags::BUS_WIDTH_1
                | HostFlags::BUS_WIDTH_4
                | HostFlags::BUS_WIDTH_8
                | HostFlags::DDR,
            slot: 1,
            max_freq_khz: SDMMC_DEFAULT_FREQ_KHZ,
        }
    }

    /// SD card on an SPI bus.
    pub fn sdspi() -> Self {
        Self {
            flags: HostFlags::SPI,
            slot: 1,
            max_freq_khz: SDMMC_DEFAULT_FREQ_KHZ,
        }
    }

    pub fn is_spi(&self) -> bool {
        self.flags.contains(HostFlags::SPI)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiDeviceConfig {
    pub host_id: u32,
    pub gpio_cs: i32,
    /// Card-detect pin, `None` if not wired.
    pub gpio_cd: Option<i32>,
    /// Write-protect pin, `None` if not wired.
    pub gpio_wp: Option<i32>,
    pub gpio_int: Option<i32>,
}

impl Default for SpiDeviceConfig {
    fn default() -> Self {
        Self {
            host_id: 1,
            gpio_cs: 13,
            gpio_cd: None,
            gpio_wp: None,
            gpio_int: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeSlotConfig {
    /// Bus width in data lines (1, 4 or 8); `0` lets the driver pick the slot maximum.
    pub width: u8,
    pub gpio_cd: Option<i32>,
    pub gpio_wp: Option<i32>,
    pub internal_pullup: bool,
}

/// Slot configuration. The variant must agree with [`HostFlags::SPI`] on the host config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotConfig {
    Spi(SpiDeviceConfig),
    Native(NativeSlotConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Sdsc,
    Sdhc,
    Mmc,
}

/// Identification data read from the card during bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub name: String,
    pub kind: CardKind,
    pub sector_size: u32,
    pub capacity_sectors: u64,
    pub max_freq_khz: u32,
}

impl CardInfo {
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_sectors * u64::from(self.sector_size)
    }
}

/// SD host controller driver.
///
/// `slot` arguments are the values returned by [`SdHost::attach_spi_device`] (SPI) or the
/// configured controller slot (native).
pub trait SdHost: Send {
    /// Whether the host has a native SD/MMC controller in addition to SPI.
    fn supports_native_slots(&self) -> bool;

    /// Initialize the host bus. An already-initialized bus reports
    /// [`StorageError::InvalidState`], which callers treat as success.
    fn init_host(&mut self) -> Result<()>;

    fn deinit_host(&mut self) -> Result<()>;

    fn attach_spi_device(&mut self, config: &SpiDeviceConfig) -> Result<u32>;

    fn detach_spi_device(&mut self, slot: u32) -> Result<()>;

    fn init_native_slot(&mut self, slot: u32, config: &NativeSlotConfig) -> Result<()>;

    /// Run the card handshake and read its identification registers.
    fn identify_card(&mut self, slot: u32, max_freq_khz: u32) -> Result<CardInfo>;

    fn read_sectors(&mut self, slot: u32, first: u64, buf: &mut [u8]) -> Result<()>;

    fn write_sectors(&mut self, slot: u32, first: u64, buf: &[u8]) -> Result<()>;

    fn erase_sectors(&mut self, slot: u32, first: u64, count: u64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachedSlot {
    Spi(u32),
    Native(u32),
}

impl AttachedSlot {
    fn slot(self) -> u32 {
        match self {
            Self::Spi(slot) | Self::Native(slot) => slot,
        }
    }
}

/// Host resources acquired so far; dropping it releases them in reverse order.
struct CardLease<H: SdHost> {
    host: H,
    host_ready: bool,
    attached: Option<AttachedSlot>,
}

impl<H: SdHost> CardLease<H> {
    fn new(host: H) -> Self {
        Self {
            host,
            host_ready: false,
            attached: None,
        }
    }

    fn init_host(&mut self) -> Result<()> {
        match self.host.init_host() {
            Ok(()) => {}
            Err(StorageError::InvalidState(_)) => {
                tracing::debug!("sd host already initialized");
            }
            Err(err) => {
                tracing::error!(error = %err, "sd host init failed");
                return Err(err);
            }
        }
        self.host_ready = true;
        Ok(())
    }

    fn attach(&mut self, host_config: &HostConfig, slot_config: &SlotConfig) -> Result<()> {
        let attached = match slot_config {
            SlotConfig::Spi(spi) => {
                let slot = self.host.attach_spi_device(spi).map_err(|err| {
                    tracing::error!(error = %err, "sd spi device attach failed");
                    err
                })?;
                AttachedSlot::Spi(slot)
            }
            SlotConfig::Native(native) => {
                if !self.host.supports_native_slots() {
                    tracing::error!("sd/mmc native host is not supported");
                    return Err(StorageError::NotSupported("sd/mmc native host slot"));
                }
                self.host
                    .init_native_slot(host_config.slot, native)
                    .map_err(|err| {
                        tracing::error!(
                            slot = host_config.slot,
                            error = %err,
                            "sd/mmc slot init failed"
                        );
                        err
                    })?;
                AttachedSlot::Native(host_config.slot)
            }
        };
        self.attached = Some(attached);
        Ok(())
    }

    fn slot(&self) -> Result<u32> {
        self.attached
            .map(AttachedSlot::slot)
            .ok_or(StorageError::InvalidState("card slot is not attached"))
    }
}

impl<H: SdHost> Drop for CardLease<H> {
    fn drop(&mut self) {
        if let Some(AttachedSlot::Spi(slot)) = self.attached.take() {
            if let Err(err) = self.host.detach_spi_device(slot) {
                tracing::warn!(slot, error = %err, "failed to detach sd spi device");
            }
        }
        if std::mem::take(&mut self.host_ready) {
            if let Err(err) = self.host.deinit_host() {
                tracing::warn!(error = %err, "failed to deinit sd host");
            }
        }
    }
}

/// An identified SD card, usable as a [`StorageBackend`].
pub struct CardBackend<H: SdHost> {
    lease: CardLease<H>,
    slot: u32,
    info: CardInfo,
}

impl<H: SdHost> CardBackend<H> {
    /// Bring up host, slot and card. On failure everything acquired so far has already been
    /// released when this returns.
    pub fn acquire(host: H, host_config: &HostConfig, slot_config: &SlotConfig) -> Result<Self> {
        let spi_slot = matches!(slot_config, SlotConfig::Spi(_));
        if host_config.is_spi() != spi_slot {
            return Err(StorageError::InvalidArgument(
                "slot config does not match host SPI flag",
            ));
        }

        let mut lease = CardLease::new(host);
        lease.init_host()?;
        lease.attach(host_config, slot_config)?;

        let slot = lease.slot()?;
        let info = lease
            .host
            .identify_card(slot, host_config.max_freq_khz)
            .map_err(|err| {
                tracing::error!(slot, error = %err, "sd card init failed");
                err
            })?;
        if !is_supported_sector_size(info.sector_size) {
            return Err(StorageError::NotSupported("card sector size"));
        }
        if info.capacity_sectors == 0 {
            return Err(StorageError::NotSupported("card reports zero capacity"));
        }

        tracing::debug!(
            card = %info.name,
            kind = ?info.kind,
            sectors = info.capacity_sectors,
            sector_size = info.sector_size,
            "sd card identified"
        );
        Ok(Self { lease, slot, info })
    }

    pub fn info(&self) -> &CardInfo {
        &self.info
    }

    pub fn host(&self) -> &H {
        &self.lease.host
    }
}

impl<H: SdHost> StorageBackend for CardBackend<H> {
    fn label(&self) -> &str {
        &self.info.name
    }

    fn sector_size(&self) -> u32 {
        self.info.sector_size
    }

    fn capacity_sectors(&self) -> u64 {
        self.info.capacity_sectors
    }

    fn read_sectors(&mut self, first: u64, buf: &mut [u8]) -> Result<()> {
        self.lease.host.read_sectors(self.slot, first, buf)
    }

    fn write_sectors(&mut self, first: u64, buf: &[u8]) -> Result<()> {
        self.lease.host.write_sectors(self.slot, first, buf)
    }

    fn erase_sectors(&mut self, first: u64, count: u64) -> Result<()> {
        self.lease.host.erase_sectors(self.slot, first, count)
    }
}
