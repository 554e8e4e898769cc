//! The durable store.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::log::{self, LogOp, ScanEnd};
use crate::state::StoreState;
use crate::txn::StoreTxn;
use crate::types::{
    CachedEntity, ContainerId, DeadLetterEntry, KeyVaultRecord, LockoutRecord, Mutation,
    MutationDraft, SyncCursor,
};
use mailsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Location and description of a damaged frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCorruption {
    /// Offset of the first bad frame.
    pub offset: u64,
    /// What was wrong with it.
    pub message: String,
}

impl std::fmt::Display for LogCorruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "corrupt frame at offset {}: {}", self.offset, self.message)
    }
}

/// Counts reported by [`DurableStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Cached entities across all containers.
    pub entities: usize,
    /// Containers holding entities.
    pub containers: usize,
    /// Queued mutations.
    pub pending_mutations: usize,
    /// Dead-letter entries.
    pub dead_letters: usize,
    /// Stored cursors.
    pub cursors: usize,
    /// Committed frames in the log.
    pub frames: u64,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Whether a key vault is present.
    pub has_vault: bool,
}

/// Result of [`DurableStore::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Valid frames found.
    pub frames: u64,
    /// Bytes covered by valid frames.
    pub valid_bytes: u64,
    /// Total log size.
    pub total_bytes: u64,
    /// Offset of an incomplete trailing frame.
    pub torn_tail: Option<u64>,
    /// First damaged frame.
    pub corruption: Option<LogCorruption>,
}

impl VerifyReport {
    /// Returns true if every byte of the log belongs to a valid frame.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.torn_tail.is_none() && self.corruption.is_none()
    }
}

/// Result of [`DurableStore::recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Frames kept.
    pub frames_kept: u64,
    /// Bytes cut from the end of the log.
    pub bytes_discarded: u64,
}

/// Durable, transactional store for one account.
///
/// All writes go through [`transaction`](Self::transaction) (the convenience
/// methods open one internally). Reads are served from memory.
///
/// If open finds a damaged frame, the valid prefix is loaded and every write
/// fails with [`StoreError::Corrupt`] until [`recover`](Self::recover) runs.
pub struct DurableStore {
    backend: Mutex<Box<dyn StorageBackend>>,
    state: RwLock<StoreState>,
    config: StoreConfig,
}

impl DurableStore {
    /// Opens a store over a storage medium, replaying its log.
    ///
    /// A torn trailing frame is truncated away unless the configuration is
    /// read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read or truncated.
    pub fn open(mut backend: Box<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        let repair = if config.read_only {
            Repair::Nothing
        } else {
            Repair::TornTail
        };
        let state = replay(&mut *backend, repair)?;
        info!(
            frames = state.frames,
            entities = state.entities.values().map(|m| m.len()).sum::<usize>(),
            pending = state.mutations.len(),
            read_only = config.read_only,
            "store opened"
        );
        Ok(Self {
            backend: Mutex::new(backend),
            state: RwLock::new(state),
            config,
        })
    }

    /// Opens an empty in-memory store with default configuration.
    ///
    /// # Errors
    ///
    /// Infallible in practice; kept fallible to match [`open`](Self::open).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a file-backed store, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is locked by another process or cannot
    /// be opened.
    pub fn open_file(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend), config)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the damage found at open, if writes are currently refused.
    #[must_use]
    pub fn corruption(&self) -> Option<LogCorruption> {
        self.state.read().corruption.clone()
    }

    /// Runs `f` as one atomic transaction.
    ///
    /// If `f` returns an error nothing is written. Otherwise the buffered
    /// writes are appended as one frame, flushed, and only then applied to
    /// memory; a failed append applies nothing.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a store error converted into `E`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        if self.config.read_only {
            return Err(StoreError::ReadOnly.into());
        }
        let mut backend = self.backend.lock();

        let (value, ops) = {
            let state = self.state.read();
            if let Some(c) = &state.corruption {
                return Err(StoreError::corrupt(c.offset, c.message.clone()).into());
            }
            let mut txn = StoreTxn::new(&state, &self.config);
            let value = f(&mut txn)?;
            (value, txn.into_ops())
        };

        if ops.is_empty() {
            return Ok(value);
        }

        self.commit(&mut **backend, &ops)?;

        let mut state = self.state.write();
        state.frames += 1;
        for op in ops {
            state.apply(op);
        }
        Ok(value)
    }

    fn commit(&self, backend: &mut dyn StorageBackend, ops: &[LogOp]) -> StoreResult<()> {
        let frame = log::encode_frame(ops)?;
        let before = backend.size()?;

        let written = backend.append(&frame).and_then(|_| {
            backend.flush()?;
            if self.config.sync_on_commit {
                backend.sync()?;
            }
            Ok(())
        });

        if let Err(err) = written {
            if backend.size().map_or(false, |size| size > before) {
                if let Err(undo) = backend.truncate(before) {
                    warn!(error = %undo, "could not roll back partial frame");
                }
            }
            warn!(error = %err, ops = ops.len(), "commit failed");
            return Err(err.into());
        }

        debug!(ops = ops.len(), bytes = frame.len(), "committed frame");
        Ok(())
    }

    // --- entities ---

    /// Reads a cached entity.
    #[must_use]
    pub fn get(&self, container: &ContainerId, id: &str) -> Option<CachedEntity> {
        self.state.read().entity(container, id).cloned()
    }

    /// Upserts a cached entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn put(&self, entity: CachedEntity) -> StoreResult<()> {
        self.transaction(|txn| {
            txn.put(entity);
            Ok(())
        })
    }

    /// Deletes a cached entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn delete(&self, container: &ContainerId, id: &str) -> StoreResult<()> {
        self.transaction(|txn| {
            txn.delete(container, id);
            Ok(())
        })
    }

    /// Returns every entity of `container` matching `predicate`, ordered by id.
    pub fn query<P>(&self, container: &ContainerId, predicate: P) -> Vec<CachedEntity>
    where
        P: Fn(&CachedEntity) -> bool,
    {
        self.state
            .read()
            .entities
            .get(container)
            .map(|items| items.values().filter(|e| predicate(e)).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every container the store knows about: those with cached
    /// entities, a cursor, or queued mutations.
    #[must_use]
    pub fn containers(&self) -> Vec<ContainerId> {
        let state = self.state.read();
        let mut all: BTreeSet<ContainerId> = state
            .entities
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(c, _)| c.clone())
            .collect();
        all.extend(state.cursors.keys().cloned());
        all.extend(state.mutations.values().map(|m| m.target.container.clone()));
        all.into_iter().collect()
    }

    // --- mutation queue ---

    /// Queues a mutation, returning its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueueFull`] at the bound.
    pub fn enqueue_mutation(&self, draft: MutationDraft) -> StoreResult<u64> {
        self.transaction(|txn| txn.enqueue(draft))
    }

    /// Removes a confirmed mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn dequeue_mutation(&self, seq: u64) -> StoreResult<Mutation> {
        self.transaction(|txn| txn.dequeue(seq))
    }

    /// Replaces a queued mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn update_mutation(&self, mutation: Mutation) -> StoreResult<()> {
        self.transaction(|txn| txn.update_mutation(mutation))
    }

    /// Returns one queued mutation.
    #[must_use]
    pub fn mutation(&self, seq: u64) -> Option<Mutation> {
        self.state.read().mutations.get(&seq).cloned()
    }

    /// Returns every queued mutation in sequence order.
    #[must_use]
    pub fn list_mutations(&self) -> Vec<Mutation> {
        self.state.read().mutations.values().cloned().collect()
    }

    /// Returns the queued mutations targeting `container`, in sequence order.
    #[must_use]
    pub fn mutations_for(&self, container: &ContainerId) -> Vec<Mutation> {
        self.state
            .read()
            .mutations
            .values()
            .filter(|m| &m.target.container == container)
            .cloned()
            .collect()
    }

    /// Moves a mutation to the dead-letter set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn move_to_dead_letter(
        &self,
        seq: u64,
        reason: &str,
        now_ms: u64,
    ) -> StoreResult<DeadLetterEntry> {
        self.transaction(|txn| txn.dead_letter(seq, reason, now_ms))
    }

    /// Returns every dead-letter entry in sequence order.
    #[must_use]
    pub fn list_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.state.read().dead_letters.values().cloned().collect()
    }

    /// Returns the dead-letter entries targeting `container`.
    #[must_use]
    pub fn dead_letters_for(&self, container: &ContainerId) -> Vec<DeadLetterEntry> {
        self.state
            .read()
            .dead_letters
            .values()
            .filter(|d| &d.mutation.target.container == container)
            .cloned()
            .collect()
    }

    /// Requeues a dead-letter entry under a fresh sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeadLetterNotFound`] or [`StoreError::QueueFull`];
    /// in both cases the entry stays where it was.
    pub fn requeue_dead_letter(&self, seq: u64, now_ms: u64) -> StoreResult<u64> {
        let new_seq = self.transaction(|txn| txn.requeue_dead_letter(seq, now_ms))?;
        info!(seq, new_seq, "dead letter requeued");
        Ok(new_seq)
    }

    /// Deletes a dead-letter entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeadLetterNotFound`] if it does not exist.
    pub fn discard_dead_letter(&self, seq: u64) -> StoreResult<DeadLetterEntry> {
        let entry = self.transaction(|txn| txn.discard_dead_letter(seq))?;
        info!(seq, "dead letter discarded");
        Ok(entry)
    }

    // --- cursors ---

    /// Returns a container's cursor.
    #[must_use]
    pub fn cursor(&self, container: &ContainerId) -> Option<SyncCursor> {
        self.state.read().cursors.get(container).cloned()
    }

    // --- vault and lockout ---

    /// Returns the key vault record.
    #[must_use]
    pub fn vault_record(&self) -> Option<KeyVaultRecord> {
        self.state.read().vault.clone()
    }

    /// Writes the key vault record.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn set_vault_record(&self, record: KeyVaultRecord) -> StoreResult<()> {
        self.transaction(|txn| {
            txn.set_vault_record(record);
            Ok(())
        })
    }

    /// Removes the key vault record.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn clear_vault_record(&self) -> StoreResult<()> {
        self.transaction(|txn| {
            txn.clear_vault_record();
            Ok(())
        })
    }

    /// Returns the lockout record.
    #[must_use]
    pub fn lockout(&self) -> LockoutRecord {
        self.state.read().lockout
    }

    /// Writes the lockout record.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn set_lockout(&self, record: LockoutRecord) -> StoreResult<()> {
        self.transaction(|txn| {
            txn.set_lockout(record);
            Ok(())
        })
    }

    // --- maintenance ---

    /// Returns store counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium size cannot be read.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let log_bytes = self.backend.lock().size()?;
        let state = self.state.read();
        Ok(StoreStats {
            entities: state.entities.values().map(|m| m.len()).sum(),
            containers: state.entities.values().filter(|m| !m.is_empty()).count(),
            pending_mutations: state.mutations.len(),
            dead_letters: state.dead_letters.len(),
            cursors: state.cursors.len(),
            frames: state.frames,
            log_bytes,
            has_vault: state.vault.is_some(),
        })
    }

    /// Re-reads the whole medium and checks every frame without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    pub fn verify(&self) -> StoreResult<VerifyReport> {
        let backend = self.backend.lock();
        verify_medium(&**backend)
    }

    /// Cuts the log back to its last valid frame, discarding everything from
    /// the first damaged or incomplete frame on, and rebuilds memory from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read or truncated.
    pub fn recover(&self) -> StoreResult<RecoveryReport> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut backend = self.backend.lock();
        let before = backend.size()?;
        let state = replay(&mut **backend, Repair::All)?;
        let after = backend.size()?;
        let report = RecoveryReport {
            frames_kept: state.frames,
            bytes_discarded: before - after,
        };
        *self.state.write() = state;
        if report.bytes_discarded > 0 {
            warn!(
                frames_kept = report.frames_kept,
                bytes_discarded = report.bytes_discarded,
                "store recovered by truncation"
            );
        } else {
            info!(frames = report.frames_kept, "store verified clean");
        }
        Ok(report)
    }

    /// Destroys every record of the account and empties the medium.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be truncated.
    pub fn wipe(&self) -> StoreResult<()> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        backend.sync()?;
        *self.state.write() = StoreState::default();
        info!("store wiped");
        Ok(())
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Checks every frame on `backend` without opening a store over it.
///
/// Unlike [`DurableStore::open`], a torn tail is reported rather than cut.
///
/// # Errors
///
/// Returns an error if the medium cannot be read.
pub fn verify_medium(backend: &dyn StorageBackend) -> StoreResult<VerifyReport> {
    let bytes = backend.read_all()?;
    let scan = log::scan(&bytes, |_, _| {});
    let (torn_tail, corruption) = match scan.end {
        ScanEnd::Clean => (None, None),
        ScanEnd::TornTail { offset } => (Some(offset), None),
        ScanEnd::Corrupt { offset, message } => (None, Some(LogCorruption { offset, message })),
    };
    Ok(VerifyReport {
        frames: scan.frames,
        valid_bytes: scan.valid_len,
        total_bytes: bytes.len() as u64,
        torn_tail,
        corruption,
    })
}

/// What [`replay`] may cut from the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    Nothing,
    TornTail,
    All,
}

/// Rebuilds state from the medium, cutting whatever `repair` allows.
fn replay(backend: &mut dyn StorageBackend, repair: Repair) -> StoreResult<StoreState> {
    let bytes = backend.read_all()?;
    let mut state = StoreState::default();
    let scan = log::scan(&bytes, |_, ops| {
        for op in ops {
            state.apply(op);
        }
    });
    state.frames = scan.frames;

    match scan.end {
        ScanEnd::Clean => {}
        ScanEnd::TornTail { offset } if repair == Repair::Nothing => {
            warn!(offset, "store log ends in a torn frame, left in place");
        }
        ScanEnd::TornTail { offset } => {
            warn!(
                offset,
                discarded = bytes.len() as u64 - offset,
                "dropping torn tail of store log"
            );
            backend.truncate(offset)?;
        }
        ScanEnd::Corrupt { offset, message } => {
            if repair == Repair::All {
                backend.truncate(offset)?;
                backend.sync()?;
            } else {
                error!(offset, %message, "store log is corrupt, writes refused until recovery");
                state.corruption = Some(LogCorruption { offset, message });
            }
        }
    }
    Ok(state)
}
