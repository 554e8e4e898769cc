//! Account log stored in an OS file.

use crate::backend::{check_quota, check_shrink, StorageBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One account's log file, held under an exclusive advisory lock.
///
/// The lock lasts as long as the backend, so a second window or a CLI run
/// against a live account gets [`StorageError::Locked`] instead of
/// interleaving frames.
///
/// ```no_run
/// use mailsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open_with_create_dirs(Path::new("accounts/alice/store.mslog"))?;
/// log.append(b"frame")?;
/// log.sync()?;
/// # Ok::<(), mailsync_storage::StorageError>(())
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    label: String,
    file: Mutex<File>,
    len: u64,
    quota: Option<u64>,
}

impl FileBackend {
    /// Opens the log at `path`, creating an empty one if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process has the account
    /// open, or an I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_inner(path, true)
    }

    /// Opens the log at `path` only if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an I/O error of kind `NotFound` for a missing file, or
    /// [`StorageError::Locked`].
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        Self::open_inner(path, false)
    }

    /// Opens the log, first creating the account directory.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open), plus failures creating the directory.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    fn open_inner(path: &Path, create: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive().map_err(|err| {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                StorageError::Locked
            } else {
                StorageError::Io(err)
            }
        })?;

        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            label: path.display().to_string(),
            file: Mutex::new(file),
            len,
            quota: None,
        })
    }

    /// Caps the log at `limit` bytes.
    #[must_use]
    pub fn with_quota(mut self, limit: u64) -> Self {
        self.quota = Some(limit);
        self
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&*self.file.lock());
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::with_capacity(self.len as usize);
        (&mut *file).take(self.len).read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn append(&mut self, frame: &[u8]) -> StorageResult<u64> {
        check_quota(&self.label, self.quota, self.len, frame.len())?;
        let at = self.len;
        if frame.is_empty() {
            return Ok(at);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(at))?;
        file.write_all(frame)?;
        self.len += frame.len() as u64;
        Ok(at)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        check_shrink(len, self.len)?;
        let file = self.file.get_mut();
        file.set_len(len)?;
        file.sync_all()?;
        self.len = len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mslog");
        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"frame-1").unwrap();
            log.append(b"frame-2").unwrap();
            log.sync().unwrap();
        }

        let mut log = FileBackend::open(&path).unwrap();
        assert_eq!(log.read_all().unwrap(), b"frame-1frame-2");
        assert_eq!(log.append(b"frame-3").unwrap(), 14);
    }

    #[test]
    fn account_open_elsewhere_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mslog");

        let live = FileBackend::open(&path).unwrap();
        assert!(matches!(FileBackend::open(&path), Err(StorageError::Locked)));
        assert!(matches!(FileBackend::open_existing(&path), Err(StorageError::Locked)));

        drop(live);
        assert!(FileBackend::open_existing(&path).is_ok());
    }

    #[test]
    fn open_existing_never_creates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.mslog");

        let err = FileBackend::open_existing(&path).unwrap_err();
        assert!(matches!(err, StorageError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound));
        assert!(!path.exists());
    }

    #[test]
    fn quota_error_names_account_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mslog");

        let mut log = FileBackend::open(&path).unwrap().with_quota(8);
        log.append(b"frame").unwrap();
        let err = log.append(b"frame").unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded { ref medium, requested: 5, limit: 8 }
                if medium == &path.display().to_string()
        ));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);
    }

    #[test]
    fn cut_tail_stays_cut_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mslog");
        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"good-frame|torn").unwrap();
            log.truncate(10).unwrap();
            assert!(log.truncate(11).is_err());
        }

        let log = FileBackend::open_existing(&path).unwrap();
        assert_eq!(log.read_all().unwrap(), b"good-frame");
    }

    #[test]
    fn account_directory_is_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts").join("alice").join("store.mslog");

        let log = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert_eq!(log.path(), path);
    }
}
