use crate::Result;

/// Size and geometry of a volume as seen by the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDescriptor {
    /// Volume size in bytes.
    pub volume_size: u64,
    pub sector_size: u32,
}

impl VolumeDescriptor {
    pub fn sector_count(&self) -> u64 {
        self.volume_size / u64::from(self.sector_size)
    }
}

/// Sector-granular storage device that a journaled volume can be mounted on.
///
/// Implementations own whatever the device needs to stay usable (host bus, attached card,
/// wear-levelling instance). Dropping the backend tears all of it down; there is no
/// separate "close" call, so a backend that has been dropped can never be reached again.
///
/// All offsets and counts are in sectors of [`StorageBackend::sector_size`] bytes. Buffers
/// passed to `read_sectors`/`write_sectors` are always a whole number of sectors long.
pub trait StorageBackend: Send {
    /// Short human-readable name used in log output (e.g. card product name, partition label).
    fn label(&self) -> &str;

    fn sector_size(&self) -> u32;

    fn capacity_sectors(&self) -> u64;

    fn read_sectors(&mut self, first: u64, buf: &mut [u8]) -> Result<()>;

    fn write_sectors(&mut self, first: u64, buf: &[u8]) -> Result<()>;

    fn erase_sectors(&mut self, first: u64, count: u64) -> Result<()>;

    fn volume(&self) -> VolumeDescriptor {
        VolumeDescriptor {
            volume_size: self.capacity_sectors() * u64::from(self.sector_size()),
            sector_size: self.sector_size(),
        }
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn sector_size(&self) -> u32 {
        (**self).sector_size()
    }

    fn capacity_sectors(&self) -> u64 {
        (**self).capacity_sectors()
    }

    fn read_sectors(&mut self, first: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_sectors(first, buf)
    }

    fn write_sectors(&mut self, first: u64, buf: &[u8]) -> Result<()> {
        (**self).write_sectors(first, buf)
    }

    fn erase_sectors(&mut self, first: u64, count: u64) -> Result<()> {
        (**self).erase_sectors(first, count)
    }
}
