//! Wear-levelled flash partitions.

use crate::util::is_supported_sector_size;
use crate::{Result, StorageBackend, StorageError};

/// Entry of the flash partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub label: String,
    /// Byte offset of the partition on the flash chip.
    pub offset: u64,
    /// Partition size in bytes.
    pub size: u64,
}

/// Handle of a mounted wear-levelling instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WlHandle(pub u32);

/// Partition table lookup plus the wear-levelling layer on top of a flash chip.
///
/// Addresses passed to the `wl_*` I/O calls are logical byte addresses inside the
/// wear-levelled area; the translation to physical flash cells is the driver's business.
pub trait FlashDriver: Send {
    fn find_partition(&self, label: &str) -> Option<Partition>;

    /// Mount wear levelling on `partition`. Mounting a partition that already has a live
    /// instance fails with [`StorageError::InvalidState`].
    fn wl_mount(&mut self, partition: &Partition) -> Result<WlHandle>;

    fn wl_unmount(&mut self, handle: WlHandle) -> Result<()>;

    /// Usable size in bytes (partition size minus wear-levelling metadata).
    fn wl_size(&self, handle: WlHandle) -> u64;

    fn wl_sector_size(&self, handle: WlHandle) -> u32;

    fn wl_read(&mut self, handle: WlHandle, addr: u64, buf: &mut [u8]) -> Result<()>;

    fn wl_write(&mut self, handle: WlHandle, addr: u64, buf: &[u8]) -> Result<()>;

    fn wl_erase_range(&mut self, handle: WlHandle, addr: u64, len: u64) -> Result<()>;
}

struct WlLease<F: FlashDriver> {
    driver: F,
    handle: Option<WlHandle>,
}

impl<F: FlashDriver> Drop for WlLease<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.driver.wl_unmount(handle) {
                tracing::warn!(error = %err, "failed to unmount wear levelling");
            }
        }
    }
}

/// A mounted wear-levelling instance over a labelled partition.
pub struct FlashBackend<F: FlashDriver> {
    lease: WlLease<F>,
    handle: WlHandle,
    partition: Partition,
    sector_size: u32,
    capacity_sectors: u64,
}

impl<F: FlashDriver> FlashBackend<F> {
    pub fn acquire(driver: F, partition_label: &str) -> Result<Self> {
        if partition_label.is_empty() {
            return Err(StorageError::InvalidArgument("empty partition label"));
        }
        let Some(partition) = driver.find_partition(partition_label) else {
            tracing::error!(label = partition_label, "partition not found");
            return Err(StorageError::NotFound(format!(
                "partition with label {partition_label:?}"
            )));
        };

        let mut lease = WlLease {
            driver,
            handle: None,
        };
        let handle = lease.driver.wl_mount(&partition).map_err(|err| {
            tracing::error!(
                label = partition_label,
                error = %err,
                "failed to mount wear levelling"
            );
            err
        })?;
        lease.handle = Some(handle);

        let sector_size = lease.driver.wl_sector_size(handle);
        if !is_supported_sector_size(sector_size) {
            return Err(StorageError::NotSupported("wear levelling sector size"));
        }
        let capacity_sectors = lease.driver.wl_size(handle) / u64::from(sector_size);
        if capacity_sectors == 0 {
            return Err(StorageError::NotSupported("partition too small"));
        }

        tracing::debug!(
            label = partition_label,
            offset = partition.offset,
            sectors = capacity_sectors,
            sector_size,
            "wear levelling mounted"
        );
        Ok(Self {
            lease,
            handle,
            partition,
            sector_size,
            capacity_sectors,
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn driver(&self) -> &F {
        &self.lease.driver
    }

    fn byte_addr(&self, sector: u64) -> Result<u64> {
        sector
            .checked_mul(u64::from(self.sector_size))
            .ok_or(StorageError::OffsetOverflow)
    }
}

impl<F: FlashDriver> StorageBackend for FlashBackend<F> {
    fn label(&self) -> &str {
        &self.partition.label
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    fn read_sectors(&mut self, first: u64, buf: &mut [u8]) -> Result<()> {
        let addr = self.byte_addr(first)?;
        self.lease.driver.wl_read(self.handle, addr, buf)
    }

    fn write_sectors(&mut self, first: u64, buf: &[u8]) -> Result<()> {
        let addr = self.byte_addr(first)?;
        self.lease.driver.wl_write(self.handle, addr, buf)
    }

    fn erase_sectors(&mut self, first: u64, count: u64) -> Result<()> {
        let addr = self.byte_addr(first)?;
        let len = self.byte_addr(count)?;
        self.lease.driver.wl_erase_range(self.handle, addr, len)
    }
}
