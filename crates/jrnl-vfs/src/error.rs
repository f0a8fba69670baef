use jrnl_storage::{ErrorKind, StorageError};
use thiserror::Error;

use crate::fatfs::FsError;

pub type Result<T> = std::result::Result<T, MountError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The FAT library rejected `op` (`"mount"`, `"mkfs"`).
    #[error("fatfs {op} failed: {code}")]
    Filesystem { op: &'static str, code: FsError },
}

impl MountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(err) => err.kind(),
            Self::Filesystem { .. } => ErrorKind::GenericFailure,
        }
    }
}
