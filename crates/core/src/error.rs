//! Error taxonomy shared by the key-value engine and the collection layer.
//!
//! Low-level components return these variants directly; the orchestration
//! layers forward them unchanged so callers can match on the exact cause.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by vectorkv.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Validation ──
    #[error("the key is empty")]
    KeyIsEmpty,

    #[error("the data size can't larger than segment size")]
    ValueTooLarge,

    #[error("the upper bound of pending writes can't larger than segment size")]
    PendingSizeTooLarge,

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // ── Concurrency / contract ──
    #[error("the batch is committed")]
    BatchCommitted,

    #[error("the batch is read only")]
    ReadOnlyBatch,

    #[error("the database is closed")]
    DbClosed,

    #[error("wait memtable space timeout, try again later")]
    WaitMemtableSpaceTimeOut,

    #[error("the database directory is used by another process: {0}")]
    DirectoryLocked(String),

    // ── Not found ──
    #[error("key not found in database")]
    KeyNotFound,

    #[error("segment file {0} not found")]
    SegmentNotFound(u32),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("collection '{0}' is not loaded")]
    CollectionNotLoaded(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    // ── Corruption ──
    #[error("corrupted data: {0}")]
    Corrupted(String),

    // ── Recovered faults ──
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Normal negative results, as opposed to engine failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KeyNotFound | Error::CollectionNotFound(_) | Error::CollectionNotLoaded(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
