//! Error types for the crypto layer.

use mailsync_store::StoreError;
use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No data key is installed; the app is locked.
    #[error("app is locked")]
    Locked,

    /// The PIN or passkey did not unwrap the vault.
    #[error("invalid PIN or passkey")]
    InvalidSecret,

    /// Ciphertext failed authentication: wrong key, tampering or truncation.
    #[error("record failed authentication")]
    AuthenticationFailed,

    /// Too many failed unlocks.
    #[error("unlock locked out for {retry_after_ms} ms")]
    LockedOut {
        /// Time left until the next attempt is allowed.
        retry_after_ms: u64,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Key material of the wrong length.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The account has no vault.
    #[error("app lock is not configured")]
    VaultMissing,

    /// The account already has a vault.
    #[error("app lock is already configured")]
    VaultExists,

    /// Underlying store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CryptoError {
    /// Returns true if this error condemns one record and retrying cannot help.
    #[must_use]
    pub fn is_record_fatal(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}
