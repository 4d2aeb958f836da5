use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("failed to initialize storage at {path}: {details}")]
    Initialization { path: String, details: String },

    #[error("a write transaction is already open on this store")]
    WriterActive,

    #[error("store is locked by another instance")]
    StoreLocked,

    #[error("store is closed")]
    StoreClosed,

    #[error("transaction log has already been cleared")]
    LogClosed,

    #[error("invalid page address: root_partition={is_root_partition}, level={level}, sequence={sequence}")]
    InvalidAddress {
        is_root_partition: bool,
        level: i64,
        sequence: i64,
    },

    #[error("revision {requested} does not exist (latest committed revision is {latest})")]
    RevisionOutOfRange { requested: u64, latest: u64 },

    /// The revision is published but the sync after the uber page failed,
    /// so it may not survive a crash.
    #[error("revision {revision} was published but could not be synced: {details}")]
    CommitNotDurable { revision: u64, details: String },

    #[error("entry key {key} is out of range")]
    EntryKeyOutOfRange { key: u64 },

    #[error("decode error: {details} ({context})")]
    Decode { context: String, details: String },

    #[error("data corruption: {details}")]
    DataCorruption { details: String },

    #[error("checksum mismatch in {component} at offset {offset}")]
    ChecksumMismatch { component: String, offset: u64 },

    #[error("lock poisoned: {lock_name} (another thread panicked while holding this lock)")]
    LockPoisoned { lock_name: String },

    #[error("invalid magic number")]
    InvalidMagic,

    #[error("unsupported version: {details}")]
    InvalidVersion { details: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn decode(context: &str, details: impl Into<String>) -> Self {
        Error::Decode {
            context: context.to_string(),
            details: details.into(),
        }
    }

    pub(crate) fn init(path: &std::path::Path, details: impl std::fmt::Display) -> Self {
        Error::Initialization {
            path: path.display().to_string(),
            details: details.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned {
            lock_name: "unknown".to_string(),
        }
    }
}

// Binary parsing failures are always corruption of the bytes being parsed
impl From<std::array::TryFromSliceError> for Error {
    fn from(_: std::array::TryFromSliceError) -> Self {
        Error::DataCorruption {
            details: "failed to parse binary data".to_string(),
        }
    }
}

pub trait PoisonedLockExt<'a, T> {
    fn recover_poison(self) -> T;
}

impl<'a, T> PoisonedLockExt<'a, std::sync::RwLockReadGuard<'a, T>> for std::sync::LockResult<std::sync::RwLockReadGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::RwLockReadGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<'a, T> PoisonedLockExt<'a, std::sync::RwLockWriteGuard<'a, T>> for std::sync::LockResult<std::sync::RwLockWriteGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::RwLockWriteGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<'a, T> PoisonedLockExt<'a, std::sync::MutexGuard<'a, T>> for std::sync::LockResult<std::sync::MutexGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::MutexGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
