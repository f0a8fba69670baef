//! VFS path registrations and the drive ↔ journal association table.

use std::sync::{Mutex, MutexGuard};

use jrnl_storage::StorageError;

use crate::drive::{DriveName, DriveSlot};
use crate::journal::JournalHandle;

pub const MAX_REGISTERED_PATHS: usize = 8;
pub const MAX_BASE_PATH_LEN: usize = 15;

/// Filesystem object the VFS dispatches a registered path to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsInstance(u32);

impl FsInstance {
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created(FsInstance),
    /// The path was already registered for the same drive.
    Existing(FsInstance),
}

impl Registration {
    pub fn instance(self) -> FsInstance {
        match self {
            Self::Created(instance) | Self::Existing(instance) => instance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub base_path: String,
    pub drive: DriveName,
    pub max_files: u32,
    pub instance: FsInstance,
    pub refs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub paths: Vec<PathEntry>,
    pub journals: Vec<(DriveSlot, JournalHandle)>,
}

#[derive(Default)]
struct RegistryState {
    paths: Vec<PathEntry>,
    journals: Vec<(DriveSlot, JournalHandle)>,
    next_instance: u32,
}

#[derive(Default)]
pub struct VfsRegistry {
    state: Mutex<RegistryState>,
}

/// A base path starts with `/`, has no trailing `/` and is at most 15 bytes long.
pub fn validate_base_path(path: &str) -> Result<(), StorageError> {
    if !path.starts_with('/') {
        return Err(StorageError::InvalidArgument("base path must start with '/'"));
    }
    if path.len() < 2 || path.ends_with('/') {
        return Err(StorageError::InvalidArgument("base path must name a directory"));
    }
    if path.len() > MAX_BASE_PATH_LEN {
        return Err(StorageError::InvalidArgument("base path too long"));
    }
    Ok(())
}

impl VfsRegistry {
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.lock();
        RegistrySnapshot {
            paths: state.paths.clone(),
            journals: state.journals.clone(),
        }
    }

    pub fn instance_of(&self, base_path: &str) -> Option<FsInstance> {
        self.lock()
            .paths
            .iter()
            .find(|e| e.base_path == base_path)
            .map(|e| e.instance)
    }

    /// Drive a base path is registered for.
    pub fn drive_of(&self, base_path: &str) -> Option<DriveName> {
        self.lock()
            .paths
            .iter()
            .find(|e| e.base_path == base_path)
            .map(|e| e.drive)
    }

    pub fn slot_of(&self, handle: JournalHandle) -> Option<DriveSlot> {
        self.lock()
            .journals
            .iter()
            .find(|(_, h)| *h == handle)
            .map(|(s, _)| *s)
    }

    pub fn journal_of(&self, slot: DriveSlot) -> Option<JournalHandle> {
        self.lock()
            .journals
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, h)| *h)
    }

    pub(crate) fn register_path(
        &self,
        base_path: &str,
        drive: DriveName,
        max_files: u32,
    ) -> Result<Registration, StorageError> {
        validate_base_path(base_path)?;
        let mut state = self.lock();
        if let Some(entry) = state.paths.iter_mut().find(|e| e.base_path == base_path) {
            if entry.drive != drive {
                return Err(StorageError::InvalidState(
                    "base path registered for another drive",
                ));
            }
            entry.refs += 1;
            return Ok(Registration::Existing(entry.instance));
        }
        if state.paths.iter().any(|e| e.drive == drive) {
            return Err(StorageError::InvalidState("drive already registered"));
        }
        if state.paths.len() >= MAX_REGISTERED_PATHS {
            return Err(StorageError::ResourceExhausted("too many registered paths"));
        }
        let instance = FsInstance(state.next_instance);
        state.next_instance += 1;
        state.paths.push(PathEntry {
            base_path: base_path.to_owned(),
            drive,
            max_files,
            instance,
            refs: 1,
        });
        Ok(Registration::Created(instance))
    }

    /// Drop one reference to `base_path`; the entry goes away with the last one.
    pub(crate) fn unregister_path(&self, base_path: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        let idx = state
            .paths
            .iter()
            .position(|e| e.base_path == base_path)
            .ok_or_else(|| StorageError::NotFound(format!("registered path {base_path:?}")))?;
        state.paths[idx].refs -= 1;
        if state.paths[idx].refs == 0 {
            state.paths.remove(idx);
        }
        Ok(())
    }

    pub(crate) fn bind_journal(
        &self,
        slot: DriveSlot,
        handle: JournalHandle,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.journals.iter().any(|(s, h)| *s == slot || *h == handle) {
            return Err(StorageError::InvalidState("journal association already exists"));
        }
        state.journals.push((slot, handle));
        Ok(())
    }

    pub(crate) fn unbind_journal(&self, handle: JournalHandle) -> Result<DriveSlot, StorageError> {
        let mut state = self.lock();
        let idx = state
            .journals
            .iter()
            .position(|(_, h)| *h == handle)
            .ok_or_else(|| StorageError::NotFound(format!("journal association for {handle}")))?;
        Ok(state.journals.remove(idx).0)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
