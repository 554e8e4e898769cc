//! Account log held in memory.

use crate::backend::{check_quota, check_shrink, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Name used for in-memory logs in quota errors.
const MEDIUM_NAME: &str = "memory";

/// A log kept in a shared byte buffer.
///
/// Used for ephemeral accounts and tests. Clones see the same bytes: drop a
/// store, open another over a clone, and the second store finds exactly
/// what a process restart would.
///
/// ```rust
/// use mailsync_storage::{InMemoryBackend, StorageBackend};
///
/// let medium = InMemoryBackend::new();
/// let mut writer = medium.clone();
/// writer.append(b"frame").unwrap();
/// assert_eq!(medium.read_all().unwrap(), b"frame");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
    quota: Option<u64>,
}

impl InMemoryBackend {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `bytes`, as if a previous run left them behind.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
            quota: None,
        }
    }

    /// Caps the log at `limit` bytes.
    #[must_use]
    pub fn with_quota(mut self, limit: u64) -> Self {
        self.quota = Some(limit);
        self
    }

    /// Snapshot of the current bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Flips every bit of the byte at `offset`, simulating bit rot.
    /// Offsets past the end are ignored.
    pub fn corrupt_byte(&self, offset: usize) {
        if let Some(byte) = self.bytes.write().get_mut(offset) {
            *byte ^= 0xFF;
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, frame: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let at = bytes.len() as u64;
        check_quota(MEDIUM_NAME, self.quota, at, frame.len())?;
        bytes.extend_from_slice(frame);
        Ok(at)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        check_shrink(len, bytes.len() as u64)?;
        bytes.truncate(len as usize);
        Ok(())
    }
}
