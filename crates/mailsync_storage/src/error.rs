//! Errors raised by a storage medium.

use std::io;
use thiserror::Error;

/// Result type for medium operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// What can go wrong underneath the account log.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system refused a read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The frame would push the log past its quota. Nothing was written.
    #[error("quota of {limit} bytes exceeded on {medium}: {requested} more bytes requested")]
    QuotaExceeded {
        /// Account file path, or `memory`.
        medium: String,
        /// Size of the refused frame.
        requested: u64,
        /// The configured quota.
        limit: u64,
    },

    /// A truncate asked to grow the log.
    #[error("cannot truncate log of {size} bytes to {requested}")]
    TruncateBeyondEnd {
        /// Requested length.
        requested: u64,
        /// Length at the time of the call.
        size: u64,
    },

    /// Another process has the account open.
    #[error("account store is open in another process")]
    Locked,
}

impl StorageError {
    /// Returns true if this error reports an exhausted quota.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
