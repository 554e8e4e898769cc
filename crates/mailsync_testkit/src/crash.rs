//! Crash simulation for store durability tests.
//!
//! [`CrashableBackend`] behaves like an in-memory backend until a planned
//! append, which it writes only partially before failing every later call.
//! Reopening a store on [`CrashableBackend::medium`] then shows what a
//! restart after the crash would find.

use mailsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

#[derive(Debug, Default)]
struct CrashPlan {
    /// Appends still allowed before the crash; `None` means never crash.
    remaining: Option<usize>,
    /// Percentage of the crashing append that reaches the medium.
    keep_percent: u8,
    crashed: bool,
}

/// Backend that crashes mid-append on request.
#[derive(Debug, Clone, Default)]
pub struct CrashableBackend {
    medium: InMemoryBackend,
    plan: Arc<Mutex<CrashPlan>>,
}

impl CrashableBackend {
    /// Creates a backend over an empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over an existing medium.
    pub fn over(medium: InMemoryBackend) -> Self {
        Self {
            medium,
            plan: Arc::default(),
        }
    }

    /// Crashes during the append following `appends` successful ones,
    /// keeping `keep_percent` of its bytes.
    pub fn crash_after_appends(&self, appends: usize, keep_percent: u8) {
        let mut plan = self.plan.lock();
        plan.remaining = Some(appends);
        plan.keep_percent = keep_percent.min(100);
    }

    /// Returns true once the planned crash happened.
    pub fn has_crashed(&self) -> bool {
        self.plan.lock().crashed
    }

    /// The surviving medium, sharing its bytes with this backend.
    pub fn medium(&self) -> InMemoryBackend {
        self.medium.clone()
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.plan.lock().crashed {
            Err(crashed())
        } else {
            Ok(())
        }
    }
}

fn crashed() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, "simulated crash"))
}

impl StorageBackend for CrashableBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.check_alive()?;
        self.medium.read_all()
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let torn = {
            let mut plan = self.plan.lock();
            if plan.crashed {
                return Err(crashed());
            }
            match plan.remaining {
                Some(0) => {
                    plan.crashed = true;
                    Some(data.len() * usize::from(plan.keep_percent) / 100)
                }
                Some(n) => {
                    plan.remaining = Some(n - 1);
                    None
                }
                None => None,
            }
        };

        match torn {
            Some(keep) => {
                if keep > 0 {
                    self.medium.append(&data[..keep])?;
                }
                Err(crashed())
            }
            None => self.medium.append(data),
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        self.medium.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.check_alive()?;
        self.medium.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive()?;
        self.medium.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive()?;
        self.medium.truncate(new_size)
    }
}
