//! Error types for the sync engine.

use crate::http::FetchError;
use mailsync_crypto::CryptoError;
use mailsync_protocol::ProtocolError;
use mailsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered 408, 429 or 5xx.
    #[error("server unavailable (status {status})")]
    ServerUnavailable {
        /// HTTP status.
        status: u16,
    },

    /// The server refused the request for good.
    #[error("server rejected request (status {status}): {message}")]
    ServerRejected {
        /// HTTP status.
        status: u16,
        /// Excerpt of the response body.
        message: String,
    },

    /// The mutation queue is at its bound; the mutation was not accepted.
    #[error("mutation queue is full (limit {limit})")]
    QueueFull {
        /// Configured queue bound.
        limit: usize,
    },

    /// The store log is corrupt; the engine pauses until recovery.
    #[error("store corrupt: {0}")]
    StorageCorrupt(String),

    /// Any other store failure, including an exhausted quota.
    #[error("store error: {0}")]
    Storage(StoreError),

    /// Encryption layer failure.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Malformed remote payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The cycle was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The engine is paused after store corruption.
    #[error("sync paused until the store is recovered")]
    Paused,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Timeout | SyncError::ServerUnavailable { .. }
        )
    }

    /// Returns true if the store must be recovered before syncing again.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SyncError::StorageCorrupt(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QueueFull { limit } => SyncError::QueueFull { limit },
            err if err.is_corruption() => SyncError::StorageCorrupt(err.to_string()),
            err => SyncError::Storage(err),
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Store(err) => err.into(),
            err => SyncError::Crypto(err),
        }
    }
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(message) => SyncError::Network(message),
            FetchError::Timeout => SyncError::Timeout,
        }
    }
}
