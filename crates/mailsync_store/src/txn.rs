//! Write transactions.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::log::LogOp;
use crate::state::StoreState;
use crate::types::{
    CachedEntity, ContainerId, DeadLetterEntry, KeyVaultRecord, LockoutRecord, Mutation,
    MutationDraft, SyncCursor,
};
use std::collections::{BTreeMap, BTreeSet};

/// A write transaction opened by [`DurableStore::transaction`](crate::DurableStore::transaction).
///
/// Writes are buffered and become one log frame on commit. Reads made
/// through the transaction see its own pending writes.
pub struct StoreTxn<'a> {
    state: &'a StoreState,
    max_queue_len: usize,
    ops: Vec<LogOp>,
    next_seq: u64,
    queue_len: usize,
    entities: BTreeMap<(ContainerId, String), Option<CachedEntity>>,
    cleared: BTreeSet<ContainerId>,
    cursors: BTreeMap<ContainerId, Option<SyncCursor>>,
    mutations: BTreeMap<u64, Option<Mutation>>,
    dead_letters: BTreeMap<u64, Option<DeadLetterEntry>>,
}

impl<'a> StoreTxn<'a> {
    pub(crate) fn new(state: &'a StoreState, config: &StoreConfig) -> Self {
        Self {
            state,
            max_queue_len: config.max_queue_len,
            ops: Vec::new(),
            next_seq: state.next_seq,
            queue_len: state.mutations.len(),
            entities: BTreeMap::new(),
            cleared: BTreeSet::new(),
            cursors: BTreeMap::new(),
            mutations: BTreeMap::new(),
            dead_letters: BTreeMap::new(),
        }
    }

    pub(crate) fn into_ops(self) -> Vec<LogOp> {
        self.ops
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // --- entities ---

    /// Reads an entity, including this transaction's writes.
    pub fn get(&self, container: &ContainerId, id: &str) -> Option<CachedEntity> {
        if let Some(pending) = self.entities.get(&(container.clone(), id.to_string())) {
            return pending.clone();
        }
        if self.cleared.contains(container) {
            return None;
        }
        self.state.entity(container, id).cloned()
    }

    /// Upserts an entity.
    pub fn put(&mut self, entity: CachedEntity) {
        self.entities.insert(
            (entity.container.clone(), entity.id.clone()),
            Some(entity.clone()),
        );
        self.ops.push(LogOp::PutEntity(entity));
    }

    /// Deletes an entity. Deleting a missing entity is not an error.
    pub fn delete(&mut self, container: &ContainerId, id: &str) {
        self.entities
            .insert((container.clone(), id.to_string()), None);
        self.ops.push(LogOp::DeleteEntity {
            container: container.clone(),
            id: id.to_string(),
        });
    }

    /// Drops every cached entity of a container and its cursor.
    pub fn clear_container(&mut self, container: &ContainerId) {
        self.entities.retain(|(c, _), _| c != container);
        self.cleared.insert(container.clone());
        self.cursors.insert(container.clone(), None);
        self.ops.push(LogOp::ClearContainer(container.clone()));
    }

    // --- cursors ---

    /// Reads a container's cursor.
    pub fn cursor(&self, container: &ContainerId) -> Option<SyncCursor> {
        match self.cursors.get(container) {
            Some(pending) => pending.clone(),
            None => self.state.cursors.get(container).cloned(),
        }
    }

    /// Advances a container's cursor.
    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.cursors
            .insert(cursor.container.clone(), Some(cursor.clone()));
        self.ops.push(LogOp::PutCursor(cursor));
    }

    // --- mutation queue ---

    /// Reads a queued mutation.
    pub fn mutation(&self, seq: u64) -> Option<Mutation> {
        match self.mutations.get(&seq) {
            Some(pending) => pending.clone(),
            None => self.state.mutations.get(&seq).cloned(),
        }
    }

    /// Queues a mutation and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueueFull`] at the queue bound.
    pub fn enqueue(&mut self, draft: MutationDraft) -> StoreResult<u64> {
        if self.queue_len >= self.max_queue_len {
            return Err(StoreError::QueueFull {
                limit: self.max_queue_len,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue_len += 1;
        let mutation = Mutation::from_draft(seq, draft);
        self.mutations.insert(seq, Some(mutation.clone()));
        self.ops.push(LogOp::PutMutation(mutation));
        Ok(seq)
    }

    /// Replaces a queued mutation (retry bookkeeping).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn update_mutation(&mut self, mutation: Mutation) -> StoreResult<()> {
        self.require_mutation(mutation.seq)?;
        self.mutations.insert(mutation.seq, Some(mutation.clone()));
        self.ops.push(LogOp::PutMutation(mutation));
        Ok(())
    }

    /// Removes a confirmed mutation from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn dequeue(&mut self, seq: u64) -> StoreResult<Mutation> {
        let mutation = self.require_mutation(seq)?;
        self.mutations.insert(seq, None);
        self.queue_len -= 1;
        self.ops.push(LogOp::RemoveMutation { seq });
        Ok(mutation)
    }

    /// Moves a queued mutation to the dead-letter set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn dead_letter(
        &mut self,
        seq: u64,
        reason: impl Into<String>,
        now_ms: u64,
    ) -> StoreResult<DeadLetterEntry> {
        let mutation = self.dequeue(seq)?;
        let entry = DeadLetterEntry {
            mutation,
            reason: reason.into(),
            failed_at_ms: now_ms,
        };
        self.dead_letters.insert(seq, Some(entry.clone()));
        self.ops.push(LogOp::PutDeadLetter(entry.clone()));
        Ok(entry)
    }

    /// Reads a dead-letter entry.
    pub fn dead_letter_entry(&self, seq: u64) -> Option<DeadLetterEntry> {
        match self.dead_letters.get(&seq) {
            Some(pending) => pending.clone(),
            None => self.state.dead_letters.get(&seq).cloned(),
        }
    }

    /// Puts a dead-lettered mutation back in the queue under a fresh
    /// sequence number with its retry count reset. Keeps its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeadLetterNotFound`] or [`StoreError::QueueFull`].
    pub fn requeue_dead_letter(&mut self, seq: u64, now_ms: u64) -> StoreResult<u64> {
        let entry = self.discard_dead_letter(seq)?;
        let old = entry.mutation;
        let draft = MutationDraft {
            mutation_id: old.mutation_id,
            kind: old.kind,
            target: old.target,
            payload: old.payload,
            sealed: old.sealed,
            enqueued_at_ms: now_ms,
        };
        self.enqueue(draft)
    }

    /// Deletes a dead-letter entry for good.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeadLetterNotFound`] if it does not exist.
    pub fn discard_dead_letter(&mut self, seq: u64) -> StoreResult<DeadLetterEntry> {
        let entry = self
            .dead_letter_entry(seq)
            .ok_or(StoreError::DeadLetterNotFound { seq })?;
        self.dead_letters.insert(seq, None);
        self.ops.push(LogOp::RemoveDeadLetter { seq });
        Ok(entry)
    }

    // --- vault ---

    /// Writes the key vault record.
    pub fn set_vault_record(&mut self, record: KeyVaultRecord) {
        self.ops.push(LogOp::PutVault(record));
    }

    /// Removes the key vault record.
    pub fn clear_vault_record(&mut self) {
        self.ops.push(LogOp::ClearVault);
    }

    /// Writes the lockout record.
    pub fn set_lockout(&mut self, record: LockoutRecord) {
        self.ops.push(LogOp::PutLockout(record));
    }

    fn require_mutation(&self, seq: u64) -> StoreResult<Mutation> {
        self.mutation(seq).ok_or(StoreError::MutationNotFound { seq })
    }
}
