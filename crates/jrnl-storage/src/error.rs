use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Unified error type for device bring-up, disk I/O and the collaborator traits layered on
/// top of them (journal, FAT library).
///
/// The enum is `Clone + PartialEq` so a caller can compare the error returned by a failed
/// mount with the one a collaborator reported: the orchestrator promises to hand back the
/// *first* failure verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unaligned access: offset={offset} len={len} (expected multiple of {sector_size})")]
    Unaligned {
        offset: u64,
        len: u64,
        sector_size: u32,
    },

    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Native error code reported by a collaborator (device driver, journal, ...), passed
    /// through unchanged.
    #[error("{driver} error {code:#x}")]
    Driver { driver: &'static str, code: i32 },
}

/// Coarse classification shared by every error in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    InvalidState,
    ResourceExhausted,
    NotSupported,
    GenericFailure,
    /// Verbatim collaborator code.
    Collaborator(i32),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::Unaligned { .. }
            | Self::OutOfBounds { .. }
            | Self::OffsetOverflow => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Driver { code, .. } => ErrorKind::Collaborator(*code),
        }
    }
}
