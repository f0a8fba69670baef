//! In-memory device simulations.
//!
//! [`MemCardHost`] and [`MemFlash`] implement the device driver traits over RAM so the
//! mount pipeline can be exercised without hardware. Both are cheap `Clone` handles onto
//! shared state: keep a clone around to inspect the recorded events or the media after the
//! original has been moved into a backend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::card::{
    CardInfo, CardKind, NativeSlotConfig, SdHost, SpiDeviceConfig, SDMMC_PROBING_FREQ_KHZ,
};
use crate::flash::{FlashDriver, Partition, WlHandle};
use crate::util::checked_range;
use crate::{Result, StorageError};

/// Cards above 2 GiB are high capacity.
const SDSC_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fault(slot: &Option<StorageError>) -> Result<()> {
    match slot {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    InitHost,
    DeinitHost,
    AttachSpi(u32),
    DetachSpi(u32),
    InitSlot(u32),
    Identify(u32),
    Read { first: u64, count: u64 },
    Write { first: u64, count: u64 },
    Erase { first: u64, count: u64 },
}

/// Errors to inject into the next matching [`MemCardHost`] call.
#[derive(Debug, Clone, Default)]
pub struct HostFaults {
    pub init_host: Option<StorageError>,
    pub attach_spi: Option<StorageError>,
    pub init_slot: Option<StorageError>,
    pub identify: Option<StorageError>,
    pub write: Option<StorageError>,
}

struct CardState {
    media: Vec<u8>,
    sector_size: u32,
    host_initialized: bool,
    spi_attached: Option<u32>,
    next_spi_slot: u32,
    faults: HostFaults,
    events: Vec<HostEvent>,
}

/// SD host with a RAM-backed card in its slot.
#[derive(Clone)]
pub struct MemCardHost {
    name: String,
    native_slots: bool,
    state: Arc<Mutex<CardState>>,
}

impl MemCardHost {
    pub fn new(sectors: u64, sector_size: u32) -> Self {
        let len = sectors
            .checked_mul(u64::from(sector_size))
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        Self {
            name: "SIM00".to_owned(),
            native_slots: true,
            state: Arc::new(Mutex::new(CardState {
                media: vec![0u8; len],
                sector_size,
                host_initialized: false,
                spi_attached: None,
                next_spi_slot: 0,
                faults: HostFaults::default(),
                events: Vec::new(),
            })),
        }
    }

    /// Simulate an SPI-only host (no native SD/MMC controller).
    pub fn spi_only(mut self) -> Self {
        self.native_slots = false;
        self
    }

    /// Simulate a host bus that some other component already brought up.
    pub fn host_already_initialized(self) -> Self {
        lock(&self.state).host_initialized = true;
        self
    }

    pub fn set_faults(&self, faults: HostFaults) {
        lock(&self.state).faults = faults;
    }

    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.state).events.clone()
    }

    pub fn host_initialized(&self) -> bool {
        lock(&self.state).host_initialized
    }

    pub fn spi_attached(&self) -> bool {
        lock(&self.state).spi_attached.is_some()
    }

    /// Copy `len` bytes of card media starting at byte `offset`.
    pub fn media(&self, offset: usize, len: usize) -> Vec<u8> {
        let state = lock(&self.state);
        let end = (offset + len).min(state.media.len());
        state.media[offset.min(end)..end].to_vec()
    }

    fn span(state: &CardState, first: u64, len: u64) -> Result<(usize, usize)> {
        let sector = u64::from(state.sector_size);
        let offset = first.checked_mul(sector).ok_or(StorageError::OffsetOverflow)?;
        checked_range(offset, len, state.media.len() as u64)?;
        Ok((offset as usize, (offset + len) as usize))
    }
}

impl SdHost for MemCardHost {
    fn supports_native_slots(&self) -> bool {
        self.native_slots
    }

    fn init_host(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.events.push(HostEvent::InitHost);
        fault(&state.faults.init_host)?;
        if state.host_initialized {
            return Err(StorageError::InvalidState("host already initialized"));
        }
        state.host_initialized = true;
        Ok(())
    }

    fn deinit_host(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.events.push(HostEvent::DeinitHost);
        state.host_initialized = false;
        Ok(())
    }

    fn attach_spi_device(&mut self, _config: &SpiDeviceConfig) -> Result<u32> {
        let mut state = lock(&self.state);
        let slot = state.next_spi_slot;
        state.events.push(HostEvent::AttachSpi(slot));
        fault(&state.faults.attach_spi)?;
        if state.spi_attached.is_some() {
            return Err(StorageError::InvalidState("spi device already attached"));
        }
        state.next_spi_slot += 1;
        state.spi_attached = Some(slot);
        Ok(slot)
    }

    fn detach_spi_device(&mut self, slot: u32) -> Result<()> {
        let mut state = lock(&self.state);
        state.events.push(HostEvent::DetachSpi(slot));
        if state.spi_attached != Some(slot) {
            return Err(StorageError::InvalidState("spi device not attached"));
        }
        state.spi_attached = None;
        Ok(())
    }

    fn init_native_slot(&mut self, slot: u32, _config: &NativeSlotConfig) -> Result<()> {
        let mut state = lock(&self.state);
        state.events.push(HostEvent::InitSlot(slot));
        fault(&state.faults.init_slot)
    }

    fn identify_card(&mut self, slot: u32, max_freq_khz: u32) -> Result<CardInfo> {
        let mut state = lock(&self.state);
        state.events.push(HostEvent::Identify(slot));
        fault(&state.faults.identify)?;
        if max_freq_khz < SDMMC_PROBING_FREQ_KHZ {
            return Err(StorageError::InvalidArgument("bus frequency below probing rate"));
        }
        let capacity_sectors = (state.media.len() as u64)
            .checked_div(u64::from(state.sector_size))
            .ok_or(StorageError::NotSupported("card sector size"))?;
        let kind = if state.media.len() as u64 > SDSC_MAX_BYTES {
            CardKind::Sdhc
        } else {
            CardKind::Sdsc
        };
        Ok(CardInfo {
            name: self.name.clone(),
            kind,
            sector_size: state.sector_size,
            capacity_sectors,
            max_freq_khz,
        })
    }

    fn read_sectors(&mut self, _slot: u32, first: u64, buf: &mut [u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let (start, end) = Self::span(&state, first, buf.len() as u64)?;
        let count = (buf.len() as u64)
            .checked_div(u64::from(state.sector_size))
            .unwrap_or(0);
        state.events.push(HostEvent::Read { first, count });
        buf.copy_from_slice(&state.media[start..end]);
        Ok(())
    }

    fn write_sectors(&mut self, _slot: u32, first: u64, buf: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let (start, end) = Self::span(&state, first, buf.len() as u64)?;
        let count = (buf.len() as u64)
            .checked_div(u64::from(state.sector_size))
            .unwrap_or(0);
        state.events.push(HostEvent::Write { first, count });
        fault(&state.faults.write)?;
        state.media[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn erase_sectors(&mut self, _slot: u32, first: u64, count: u64) -> Result<()> {
        let mut state = lock(&self.state);
        let len = count
            .checked_mul(u64::from(state.sector_size))
            .ok_or(StorageError::OffsetOverflow)?;
        let (start, end) = Self::span(&state, first, len)?;
        state.events.push(HostEvent::Erase { first, count });
        state.media[start..end].fill(0);
        Ok(())
    }
}

/// Wear-levelling metadata kept at the end of each partition, in sectors.
pub const WL_METADATA_SECTORS: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    Mount(String),
    Unmount(String),
    Read { addr: u64, len: u64 },
    Write { addr: u64, len: u64 },
    Erase { addr: u64, len: u64 },
}

struct FlashState {
    partitions: Vec<(Partition, Vec<u8>)>,
    mounted: BTreeMap<u32, usize>,
    next_handle: u32,
    mount_fault: Option<StorageError>,
    events: Vec<FlashEvent>,
}

/// Flash chip with a partition table, RAM backed. Erased flash reads as `0xFF`.
#[derive(Clone)]
pub struct MemFlash {
    sector_size: u32,
    state: Arc<Mutex<FlashState>>,
}

impl MemFlash {
    pub fn new(sector_size: u32) -> Self {
        Self {
            sector_size,
            state: Arc::new(Mutex::new(FlashState {
                partitions: Vec::new(),
                mounted: BTreeMap::new(),
                next_handle: 1,
                mount_fault: None,
                events: Vec::new(),
            })),
        }
    }

    /// Append a partition of `size` bytes to the partition table.
    pub fn with_partition(self, label: &str, size: u64) -> Self {
        {
            let mut state = lock(&self.state);
            let offset = state
                .partitions
                .last()
                .map(|(p, _)| p.offset + p.size)
                .unwrap_or(0x10000);
            let data = vec![0xFFu8; usize::try_from(size).unwrap_or(0)];
            state.partitions.push((
                Partition {
                    label: label.to_owned(),
                    offset,
                    size,
                },
                data,
            ));
        }
        self
    }

    pub fn set_mount_fault(&self, fault: Option<StorageError>) {
        lock(&self.state).mount_fault = fault;
    }

    pub fn events(&self) -> Vec<FlashEvent> {
        lock(&self.state).events.clone()
    }

    pub fn mounted_count(&self) -> usize {
        lock(&self.state).mounted.len()
    }

    fn wl_len(&self, partition: &Partition) -> u64 {
        partition
            .size
            .saturating_sub(WL_METADATA_SECTORS * u64::from(self.sector_size))
    }

    fn with_instance<R>(
        &self,
        handle: WlHandle,
        f: impl FnOnce(&mut Vec<u8>, u64, &mut Vec<FlashEvent>) -> Result<R>,
    ) -> Result<R> {
        let mut state = lock(&self.state);
        let idx = *state
            .mounted
            .get(&handle.0)
            .ok_or(StorageError::InvalidState("wear levelling handle not mounted"))?;
        let FlashState {
            partitions, events, ..
        } = &mut *state;
        let (partition, data) = &mut partitions[idx];
        let usable = self.wl_len(partition);
        f(data, usable, events)
    }
}

impl FlashDriver for MemFlash {
    fn find_partition(&self, label: &str) -> Option<Partition> {
        lock(&self.state)
            .partitions
            .iter()
            .find(|(p, _)| p.label == label)
            .map(|(p, _)| p.clone())
    }

    fn wl_mount(&mut self, partition: &Partition) -> Result<WlHandle> {
        let mut state = lock(&self.state);
        state.events.push(FlashEvent::Mount(partition.label.clone()));
        fault(&state.mount_fault)?;
        let idx = state
            .partitions
            .iter()
            .position(|(p, _)| p.label == partition.label)
            .ok_or_else(|| StorageError::NotFound(partition.label.clone()))?;
        if state.mounted.values().any(|&mounted| mounted == idx) {
            return Err(StorageError::InvalidState(
                "wear levelling already mounted on partition",
            ));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.mounted.insert(handle, idx);
        Ok(WlHandle(handle))
    }

    fn wl_unmount(&mut self, handle: WlHandle) -> Result<()> {
        let mut state = lock(&self.state);
        let idx = state
            .mounted
            .remove(&handle.0)
            .ok_or(StorageError::InvalidState("wear levelling handle not mounted"))?;
        let label = state.partitions[idx].0.label.clone();
        state.events.push(FlashEvent::Unmount(label));
        Ok(())
    }

    fn wl_size(&self, handle: WlHandle) -> u64 {
        let state = lock(&self.state);
        state
            .mounted
            .get(&handle.0)
            .map(|&idx| self.wl_len(&state.partitions[idx].0))
            .unwrap_or(0)
    }

    fn wl_sector_size(&self, _handle: WlHandle) -> u32 {
        self.sector_size
    }

    fn wl_read(&mut self, handle: WlHandle, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.with_instance(handle, |data, usable, events| {
            let len = buf.len() as u64;
            checked_range(addr, len, usable)?;
            events.push(FlashEvent::Read { addr, len });
            buf.copy_from_slice(&data[addr as usize..(addr + len) as usize]);
            Ok(())
        })
    }

    fn wl_write(&mut self, handle: WlHandle, addr: u64, buf: &[u8]) -> Result<()> {
        self.with_instance(handle, |data, usable, events| {
            let len = buf.len() as u64;
            checked_range(addr, len, usable)?;
            events.push(FlashEvent::Write { addr, len });
            data[addr as usize..(addr + len) as usize].copy_from_slice(buf);
            Ok(())
        })
    }

    fn wl_erase_range(&mut self, handle: WlHandle, addr: u64, len: u64) -> Result<()> {
        self.with_instance(handle, |data, usable, events| {
            checked_range(addr, len, usable)?;
            events.push(FlashEvent::Erase { addr, len });
            data[addr as usize..(addr + len) as usize].fill(0xFF);
            Ok(())
        })
    }
}
