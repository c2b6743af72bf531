//! The engine's error type.

use thiserror::Error;

/// Everything that can go wrong at the engine surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Empty keys are invalid.
    #[error("key is empty")]
    KeyEmpty,

    /// The key is not in the store (or was merged away under an iterator).
    #[error("key not found")]
    KeyNotFound,

    /// The index references a data file the engine does not have open.
    #[error("data file not found")]
    DataFileNotFound,

    /// A file in the data directory does not look like ours.
    #[error("data directory corrupted: {0}")]
    DirectoryCorrupted(String),

    /// The batch holds more entries than its configured maximum.
    #[error("write batch exceeds its maximum size")]
    BatchTooLarge,

    /// Another merge is already running.
    #[error("merge is already in progress")]
    MergeInProgress,

    /// Reclaimable bytes have not reached the configured merge ratio.
    #[error("reclaimable space below the merge ratio threshold")]
    MergeRatioUnsatisfied,

    /// The device lacks room for the rewritten data.
    #[error("not enough disk space for merge: need {need} bytes, {available} available")]
    NotEnoughDiskSpace { need: u64, available: u64 },

    /// Another process holds the directory lock.
    #[error("database directory is locked by another process")]
    FileLocked,

    /// The engine has been closed.
    #[error("engine is closed")]
    EngineClosed,

    /// A write batch needs the persisted sequence counter, which is missing
    /// (the previous session with the on-disk B+ tree index did not close
    /// cleanly).
    #[error("sequence-number file missing, cannot create a write batch")]
    SequenceFileMissing,

    /// The log says a key should be in the index but deleting it had no
    /// effect; index and log disagree.
    #[error("index delete failed for a key present in the log")]
    IndexDeleteFailed,

    /// Configuration rejected at open.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record codec or data-file failure.
    #[error(transparent)]
    Record(#[from] logfile::LogFileError),

    /// Index failure.
    #[error(transparent)]
    Index(#[from] index::IndexError),

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An engine Result.
pub type Result<T> = std::result::Result<T, EngineError>;
