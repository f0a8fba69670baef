//! Logical drive slots.
//!
//! The FAT library addresses volumes by drive number. [`DriveTable`] owns the fixed pool of
//! drive numbers and the binding of each to a mounted journal. Only the orchestrators in
//! this crate can change it; everyone else gets read access.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use jrnl_storage::StorageError;

use crate::journal::JournalHandle;

pub const MAX_DRIVES: usize = 10;
pub const DEFAULT_DRIVES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriveSlot(u8);

impl DriveSlot {
    pub fn index(self) -> u8 {
        self.0
    }

    pub fn name(self) -> DriveName {
        DriveName([b'0' + self.0, b':'])
    }
}

impl fmt::Display for DriveSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().as_str())
    }
}

/// Drive string understood by the FAT library, e.g. `"0:"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriveName([u8; 2]);

impl DriveName {
    pub fn as_str(&self) -> &str {
        // Built from an ASCII digit and ':' only.
        std::str::from_utf8(&self.0).unwrap_or("?:")
    }
}

impl fmt::Display for DriveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for DriveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriveName({:?})", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Allocated to a mount in progress, no journal bound yet.
    Reserved,
    Bound(JournalHandle),
}

#[derive(Debug)]
pub struct DriveTable {
    slots: Mutex<Vec<SlotState>>,
}

impl Default for DriveTable {
    fn default() -> Self {
        Self {
            slots: Mutex::new(vec![SlotState::Free; DEFAULT_DRIVES]),
        }
    }
}

impl DriveTable {
    pub fn new(count: usize) -> Result<Self, StorageError> {
        if count == 0 || count > MAX_DRIVES {
            return Err(StorageError::InvalidArgument("drive count must be 1..=10"));
        }
        Ok(Self {
            slots: Mutex::new(vec![SlotState::Free; count]),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|s| matches!(s, SlotState::Free))
            .count()
    }

    pub fn slot_of(&self, handle: JournalHandle) -> Option<DriveSlot> {
        self.lock()
            .iter()
            .position(|s| *s == SlotState::Bound(handle))
            .map(slot_at)
    }

    pub fn journal_of(&self, slot: DriveSlot) -> Option<JournalHandle> {
        match self.lock().get(usize::from(slot.0)) {
            Some(SlotState::Bound(handle)) => Some(*handle),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> Vec<SlotState> {
        self.lock().clone()
    }

    /// Reserve the lowest free slot.
    pub(crate) fn allocate(&self) -> Result<DriveSlot, StorageError> {
        let mut slots = self.lock();
        let idx = slots
            .iter()
            .position(|s| matches!(s, SlotState::Free))
            .ok_or(StorageError::ResourceExhausted("no free drive slot"))?;
        slots[idx] = SlotState::Reserved;
        Ok(slot_at(idx))
    }

    pub(crate) fn bind(&self, slot: DriveSlot, handle: JournalHandle) -> Result<(), StorageError> {
        if !handle.is_valid() {
            return Err(StorageError::InvalidArgument("invalid journal handle"));
        }
        let mut slots = self.lock();
        if slots.contains(&SlotState::Bound(handle)) {
            return Err(StorageError::InvalidState("journal already bound to a drive"));
        }
        let state = slots
            .get_mut(usize::from(slot.0))
            .ok_or(StorageError::InvalidArgument("drive slot out of range"))?;
        if *state != SlotState::Reserved {
            return Err(StorageError::InvalidState("drive slot is not reserved"));
        }
        *state = SlotState::Bound(handle);
        Ok(())
    }

    pub(crate) fn unbind(&self, slot: DriveSlot) -> Result<JournalHandle, StorageError> {
        let mut slots = self.lock();
        let state = slots
            .get_mut(usize::from(slot.0))
            .ok_or(StorageError::InvalidArgument("drive slot out of range"))?;
        match *state {
            SlotState::Bound(handle) => {
                *state = SlotState::Reserved;
                Ok(handle)
            }
            _ => Err(StorageError::InvalidState("drive slot is not bound")),
        }
    }

    pub(crate) fn release(&self, slot: DriveSlot) -> Result<(), StorageError> {
        let mut slots = self.lock();
        let state = slots
            .get_mut(usize::from(slot.0))
            .ok_or(StorageError::InvalidArgument("drive slot out of range"))?;
        match *state {
            SlotState::Reserved => {
                *state = SlotState::Free;
                Ok(())
            }
            SlotState::Bound(_) => Err(StorageError::InvalidState("drive slot is still bound")),
            SlotState::Free => Err(StorageError::InvalidState("drive slot is not allocated")),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SlotState>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Table length is capped at `MAX_DRIVES`, so the index always fits.
fn slot_at(idx: usize) -> DriveSlot {
    DriveSlot(idx as u8)
}
