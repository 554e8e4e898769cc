//! The medium trait the account log is written to.

use crate::error::{StorageError, StorageResult};

/// Where one account's log lives.
///
/// A medium is an append-only byte sequence with a cut-back operation. The
/// store reads the whole log once at open, then only appends frames and
/// occasionally truncates a torn or damaged tail. Frame layout, checksums
/// and encryption all belong to the store.
///
/// Every implementation honors these rules:
///
/// - `append` either writes all of `frame` and returns the offset it
///   starts at, or fails; a refused append (quota) writes nothing.
/// - `size` is the offset the next `append` lands on.
/// - `truncate` only shrinks; it is how recovery cuts a bad tail.
pub trait StorageBackend: Send + Sync {
    /// Reads the whole log.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the medium cannot be read.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends one frame and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] if the frame does not fit,
    /// or an I/O error.
    fn append(&mut self, frame: &[u8]) -> StorageResult<u64>;

    /// Hands buffered bytes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes every appended byte and the new length survive power loss.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current length of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the length cannot be read.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the log back to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TruncateBeyondEnd`] if `len` is past the end,
    /// or an I/O error.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;
}

/// Refuses a write of `extra` bytes that would push `medium` past `quota`.
pub(crate) fn check_quota(
    medium: &str,
    quota: Option<u64>,
    size: u64,
    extra: usize,
) -> StorageResult<()> {
    match quota {
        Some(limit) if size.saturating_add(extra as u64) > limit => Err(StorageError::QuotaExceeded {
            medium: medium.to_string(),
            requested: extra as u64,
            limit,
        }),
        _ => Ok(()),
    }
}

/// Refuses to grow the log through `truncate`.
pub(crate) fn check_shrink(len: u64, size: u64) -> StorageResult<()> {
    if len > size {
        Err(StorageError::TruncateBeyondEnd { requested: len, size })
    } else {
        Ok(())
    }
}
