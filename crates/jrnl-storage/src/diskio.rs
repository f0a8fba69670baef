use std::sync::Arc;

use crate::{DeviceHandle, Result, StorageError};

/// Byte-addressed disk access contract consumed by the journal.
///
/// Every address and length must be a whole number of sectors; see [`DiskIoAdapter`].
pub trait DiskIo: Send + Sync {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    fn write(&self, addr: u64, buf: &[u8]) -> Result<()>;

    fn erase_range(&self, addr: u64, len: u64) -> Result<()>;
}

/// Translates the journal's byte-addressed requests into sector commands on a
/// [`DeviceHandle`].
///
/// The device command set is strictly sector-granular, so alignment is enforced here and a
/// misaligned request never reaches the device. Zero-length requests are rejected as well:
/// no device command can express them.
#[derive(Clone, Debug)]
pub struct DiskIoAdapter {
    device: Arc<DeviceHandle>,
    sector_size: u32,
}

impl DiskIoAdapter {
    pub fn new(device: Arc<DeviceHandle>) -> Self {
        let sector_size = device.sector_size();
        Self {
            device,
            sector_size,
        }
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Validate a request and convert it to `(first_sector, sector_count)`.
    fn sector_span(&self, addr: u64, len: u64) -> Result<(u64, u64)> {
        let sector = u64::from(self.sector_size);
        if sector == 0 {
            return Err(StorageError::InvalidState("device reports zero sector size"));
        }
        if addr % sector != 0 || len % sector != 0 {
            return Err(StorageError::Unaligned {
                offset: addr,
                len,
                sector_size: self.sector_size,
            });
        }
        if len == 0 {
            return Err(StorageError::InvalidArgument("zero-length disk I/O request"));
        }
        addr.checked_add(len).ok_or(StorageError::OffsetOverflow)?;
        Ok((addr / sector, len / sector))
    }
}

fn buf_len(len: usize) -> Result<u64> {
    u64::try_from(len).map_err(|_| StorageError::OffsetOverflow)
}

impl DiskIo for DiskIoAdapter {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let (first, _count) = self.sector_span(addr, buf_len(buf.len())?)?;
        self.device
            .with_backend(|backend| backend.read_sectors(first, buf))
    }

    fn write(&self, addr: u64, buf: &[u8]) -> Result<()> {
        let (first, _count) = self.sector_span(addr, buf_len(buf.len())?)?;
        self.device
            .with_backend(|backend| backend.write_sectors(first, buf))
    }

    fn erase_range(&self, addr: u64, len: u64) -> Result<()> {
        let (first, count) = self.sector_span(addr, len)?;
        self.device
            .with_backend(|backend| backend.erase_sectors(first, count))
    }
}
