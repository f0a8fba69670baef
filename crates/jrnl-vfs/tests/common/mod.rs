#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use jrnl_storage::{DeviceHandle, DiskIo, MemFlash, StorageError};
use jrnl_vfs::{
    DriveName, FatFs, FormatOptions, FsError, FsInstance, Journal, JournalConfig,
    JournalDescriptor, JournalHandle, MountConfig, RegistrySnapshot, SlotState, VolumeManager,
};

pub const FLASH_SECTOR: u32 = 4096;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Collaborator calls in the order they happened, across journal and FAT library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    JournalMount { drive: String },
    JournalUnmount(i32),
    DirectIo(i32, bool),
    FsMount { drive: String, delay: bool },
    FsUnmount(String),
    Mkfs { drive: String, au_size: u32, work_len: usize },
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct JournalFaults {
    pub mount: Option<StorageError>,
    pub unmount: Option<StorageError>,
    pub set_direct_io: Option<StorageError>,
}

struct MountedJournal {
    descriptor: JournalDescriptor,
    direct_io: bool,
}

#[derive(Default)]
struct JournalState {
    next_handle: i32,
    mounted: BTreeMap<i32, MountedJournal>,
    faults: JournalFaults,
}

/// Journal stand-in. Mounting reads (or, with `overwrite_existing`, erases) the journal
/// store at the end of the volume through the installed disk I/O adapter.
pub struct FakeJournal {
    state: Mutex<JournalState>,
    log: EventLog,
}

impl FakeJournal {
    pub fn new(log: EventLog) -> Self {
        Self {
            state: Mutex::new(JournalState::default()),
            log,
        }
    }

    pub fn set_faults(&self, faults: JournalFaults) {
        lock(&self.state).faults = faults;
    }

    pub fn mounted_count(&self) -> usize {
        lock(&self.state).mounted.len()
    }

    pub fn direct_io(&self, handle: JournalHandle) -> Option<bool> {
        lock(&self.state).mounted.get(&handle.0).map(|m| m.direct_io)
    }

    pub fn config(&self, handle: JournalHandle) -> Option<JournalConfig> {
        lock(&self.state)
            .mounted
            .get(&handle.0)
            .map(|m| m.descriptor.config.clone())
    }
}

impl Journal for FakeJournal {
    fn mount(&self, descriptor: JournalDescriptor) -> Result<JournalHandle, StorageError> {
        lock(&self.log).push(Event::JournalMount {
            drive: descriptor.drive.name().to_string(),
        });
        let mut state = lock(&self.state);
        if let Some(err) = state.faults.mount.clone() {
            return Err(err);
        }

        let sector = u64::from(descriptor.volume.sector_size);
        let store_len = u64::from(descriptor.config.store_size_sectors) * sector;
        let store_addr = descriptor
            .volume
            .volume_size
            .checked_sub(store_len)
            .ok_or(StorageError::InvalidArgument("journal store larger than volume"))?;
        if descriptor.config.overwrite_existing {
            descriptor.diskio.erase_range(store_addr, store_len)?;
        } else {
            let mut header = vec![0u8; sector as usize];
            descriptor.diskio.read(store_addr, &mut header)?;
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.mounted.insert(
            handle,
            MountedJournal {
                descriptor,
                direct_io: true,
            },
        );
        Ok(JournalHandle(handle))
    }

    fn unmount(&self, handle: JournalHandle) -> Result<(), StorageError> {
        lock(&self.log).push(Event::JournalUnmount(handle.0));
        let mut state = lock(&self.state);
        state
            .mounted
            .remove(&handle.0)
            .ok_or(StorageError::InvalidState("journal not mounted"))?;
        match state.faults.unmount.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_direct_io(&self, handle: JournalHandle, enabled: bool) -> Result<(), StorageError> {
        lock(&self.log).push(Event::DirectIo(handle.0, enabled));
        let mut state = lock(&self.state);
        if let Some(err) = state.faults.set_direct_io.clone() {
            return Err(err);
        }
        let mounted = state
            .mounted
            .get_mut(&handle.0)
            .ok_or(StorageError::InvalidState("journal not mounted"))?;
        mounted.direct_io = enabled;
        Ok(())
    }

    fn diskio_handle(&self, handle: JournalHandle) -> Result<Arc<DeviceHandle>, StorageError> {
        lock(&self.state)
            .mounted
            .get(&handle.0)
            .map(|m| m.descriptor.diskio.device().clone())
            .ok_or(StorageError::InvalidState("journal not mounted"))
    }
}

#[derive(Default)]
struct FatState {
    mount_results: VecDeque<Result<(), FsError>>,
    mkfs_result: Option<FsError>,
    unmount_result: Option<FsError>,
    formats: Vec<FormatOptions>,
}

/// FAT library stand-in with scripted results.
pub struct FakeFatFs {
    state: Mutex<FatState>,
    log: EventLog,
}

impl FakeFatFs {
    pub fn new(log: EventLog) -> Self {
        Self {
            state: Mutex::new(FatState::default()),
            log,
        }
    }

    /// Results for the next mount calls, in order. Calls beyond the script succeed.
    pub fn script_mounts(&self, results: impl IntoIterator<Item = Result<(), FsError>>) {
        lock(&self.state).mount_results = results.into_iter().collect();
    }

    pub fn fail_mkfs(&self, code: Option<FsError>) {
        lock(&self.state).mkfs_result = code;
    }

    pub fn fail_unmount(&self, code: Option<FsError>) {
        lock(&self.state).unmount_result = code;
    }

    pub fn formats(&self) -> Vec<FormatOptions> {
        lock(&self.state).formats.clone()
    }
}

impl FatFs for FakeFatFs {
    fn mount(&self, _instance: FsInstance, drive: DriveName, delay: bool) -> Result<(), FsError> {
        lock(&self.log).push(Event::FsMount {
            drive: drive.to_string(),
            delay,
        });
        lock(&self.state).mount_results.pop_front().unwrap_or(Ok(()))
    }

    fn unmount(&self, drive: DriveName) -> Result<(), FsError> {
        lock(&self.log).push(Event::FsUnmount(drive.to_string()));
        match lock(&self.state).unmount_result {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn mkfs(
        &self,
        drive: DriveName,
        options: &FormatOptions,
        work: &mut [u8],
    ) -> Result<(), FsError> {
        lock(&self.log).push(Event::Mkfs {
            drive: drive.to_string(),
            au_size: options.au_size,
            work_len: work.len(),
        });
        let mut state = lock(&self.state);
        state.formats.push(*options);
        match state.mkfs_result {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

pub type Manager = VolumeManager<FakeJournal, FakeFatFs>;

pub struct Harness {
    pub manager: Manager,
    pub log: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let log = EventLog::default();
        Self {
            manager: VolumeManager::new(FakeJournal::new(log.clone()), FakeFatFs::new(log.clone())),
            log,
        }
    }

    pub fn with_drives(count: usize) -> Self {
        init_tracing();
        let log = EventLog::default();
        Self {
            manager: VolumeManager::with_drives(
                FakeJournal::new(log.clone()),
                FakeFatFs::new(log.clone()),
                jrnl_vfs::DriveTable::new(count).unwrap(),
            ),
            log,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.log).clone()
    }

    pub fn clear_events(&self) {
        lock(&self.log).clear();
    }

    /// Drive table and registry contents, for before/after comparisons.
    pub fn state(&self) -> (Vec<SlotState>, RegistrySnapshot) {
        (
            self.manager.drives().snapshot(),
            self.manager.registry().snapshot(),
        )
    }
}

pub fn flash() -> MemFlash {
    MemFlash::new(FLASH_SECTOR)
        .with_partition("storage", 128 * u64::from(FLASH_SECTOR))
        .with_partition("logs", 64 * u64::from(FLASH_SECTOR))
}

pub fn mount_config() -> MountConfig {
    MountConfig::default()
}

pub fn journal_config() -> JournalConfig {
    JournalConfig::default()
}
