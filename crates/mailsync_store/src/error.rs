//! Error types for the durable store.

use mailsync_storage::StorageError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage medium error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// The medium's quota would be exceeded. Nothing was written.
    #[error("storage quota exceeded on {medium}: {requested} bytes requested, limit {limit}")]
    QuotaExceeded {
        /// The medium that refused the write.
        medium: String,
        /// Bytes the failed write needed.
        requested: u64,
        /// Configured limit.
        limit: u64,
    },

    /// The log is corrupt at `offset`.
    #[error("store corrupt at offset {offset}: {message}")]
    Corrupt {
        /// Offset of the first bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The store was opened read-only.
    #[error("store is open read-only")]
    ReadOnly,

    /// The mutation queue is at its bound.
    #[error("mutation queue full ({limit} entries)")]
    QueueFull {
        /// Configured bound.
        limit: usize,
    },

    /// No queued mutation with this sequence number.
    #[error("mutation {seq} not found")]
    MutationNotFound {
        /// Sequence number looked up.
        seq: u64,
    },

    /// No dead-letter entry with this sequence number.
    #[error("dead letter {seq} not found")]
    DeadLetterNotFound {
        /// Sequence number looked up.
        seq: u64,
    },

    /// A container identifier could not be parsed.
    #[error("invalid container id: {value}")]
    InvalidContainer {
        /// The rejected input.
        value: String,
    },

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true if this error means the log can no longer be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    /// Returns true if this is a quota error.
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QuotaExceeded {
                medium,
                requested,
                limit,
            } => Self::QuotaExceeded {
                medium,
                requested,
                limit,
            },
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_is_lifted() {
        let err = StoreError::from(StorageError::QuotaExceeded {
            medium: "memory".into(),
            requested: 10,
            limit: 5,
        });
        assert!(err.is_quota_exceeded());
        assert!(!err.is_corruption());
    }

    #[test]
    fn corruption_helpers() {
        assert!(StoreError::corrupt(12, "bad crc").is_corruption());
        assert!(!StoreError::from(StorageError::Locked).is_corruption());
        assert!(!StoreError::QueueFull { limit: 1 }.is_corruption());
    }

    #[test]
    fn error_display() {
        let err = StoreError::corrupt(42, "bad magic");
        assert_eq!(err.to_string(), "store corrupt at offset 42: bad magic");
    }
}
