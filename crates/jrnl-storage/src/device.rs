use std::fmt;
use std::sync::Mutex;

use crate::{Result, StorageBackend, StorageError, VolumeDescriptor};

type BoxedBackend = Box<dyn StorageBackend>;

/// Exclusive owner of an initialized storage device.
///
/// The handle is shared (`Arc<DeviceHandle>`) between the orchestrator and the disk I/O
/// adapter installed into the journal, but the device itself lives in exactly one place.
/// [`DeviceHandle::release`] drops the backend (running its teardown); afterwards every
/// access fails with [`StorageError::InvalidState`] without reaching hardware.
pub struct DeviceHandle {
    label: String,
    volume: VolumeDescriptor,
    backend: Mutex<Option<BoxedBackend>>,
}

impl DeviceHandle {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: BoxedBackend) -> Self {
        Self {
            label: backend.label().to_owned(),
            volume: backend.volume(),
            backend: Mutex::new(Some(backend)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn volume(&self) -> VolumeDescriptor {
        self.volume
    }

    pub fn sector_size(&self) -> u32 {
        self.volume.sector_size
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    /// Tear the device down. Returns `false` if it had already been released.
    pub fn release(&self) -> bool {
        // Take the backend out first so its `Drop` runs without the lock held.
        let backend = self.lock().take();
        match backend {
            Some(backend) => {
                tracing::debug!(device = %self.label, "releasing storage device");
                drop(backend);
                true
            }
            None => false,
        }
    }

    pub(crate) fn with_backend<R>(
        &self,
        f: impl FnOnce(&mut dyn StorageBackend) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(backend) => f(&mut **backend),
            None => Err(StorageError::InvalidState("storage device already released")),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<BoxedBackend>> {
        self.backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("label", &self.label)
            .field("volume", &self.volume)
            .field("released", &self.is_released())
            .finish()
    }
}
