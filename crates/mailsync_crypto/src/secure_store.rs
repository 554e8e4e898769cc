//! Store wrapper that seals payloads on write and opens them on read.

use crate::error::{CryptoError, CryptoResult};
use crate::handle::KeyHandle;
use mailsync_store::{
    CachedEntity, ContainerId, DeadLetterEntry, DurableStore, EntityKey, Mutation, MutationDraft,
    StoreError, StoreTxn, SyncCursor,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Associated data binding an entity payload to its identity.
#[must_use]
pub fn entity_aad(key: &EntityKey) -> Vec<u8> {
    key.to_string().into_bytes()
}

/// Associated data binding a mutation payload to its target and idempotency key.
#[must_use]
pub fn mutation_aad(target: &EntityKey, mutation_id: &Uuid) -> Vec<u8> {
    format!("mutation:{target}:{mutation_id}").into_bytes()
}

/// An account store with optional record encryption.
///
/// Without a key it is a passthrough: payloads are stored in clear with
/// `sealed = false`.
#[derive(Debug, Clone)]
pub struct SecureStore {
    store: Arc<DurableStore>,
    key: Option<KeyHandle>,
}

impl SecureStore {
    /// Wraps a store without encryption.
    #[must_use]
    pub fn passthrough(store: Arc<DurableStore>) -> Self {
        Self { store, key: None }
    }

    /// Wraps a store, sealing with `key`.
    #[must_use]
    pub fn sealed(store: Arc<DurableStore>, key: KeyHandle) -> Self {
        Self {
            store,
            key: Some(key),
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// Returns the key handle, if encryption is enabled.
    #[must_use]
    pub fn key(&self) -> Option<&KeyHandle> {
        self.key.as_ref()
    }

    /// Returns true if payloads are sealed on write.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.key.is_some()
    }

    /// Seals an entity's payload. Index fields stay in clear.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] if the key was locked.
    pub fn seal_entity(&self, mut entity: CachedEntity) -> CryptoResult<CachedEntity> {
        if let Some(key) = &self.key {
            if !entity.sealed {
                entity.payload = key.encrypt_record(&entity_aad(&entity.key()), &entity.payload)?;
                entity.sealed = true;
            }
        }
        Ok(entity)
    }

    /// Opens a sealed entity's payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] without a live key, or
    /// [`CryptoError::AuthenticationFailed`] for a damaged record.
    pub fn open_entity(&self, mut entity: CachedEntity) -> CryptoResult<CachedEntity> {
        if !entity.sealed {
            return Ok(entity);
        }
        let key = self.key.as_ref().ok_or(CryptoError::Locked)?;
        entity.payload = key.decrypt_record(&entity_aad(&entity.key()), &entity.payload)?;
        entity.sealed = false;
        Ok(entity)
    }

    /// Seals a mutation draft's payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] if the key was locked.
    pub fn seal_draft(&self, mut draft: MutationDraft) -> CryptoResult<MutationDraft> {
        if let Some(key) = &self.key {
            if !draft.sealed {
                let aad = mutation_aad(&draft.target, &draft.mutation_id);
                draft.payload = key.encrypt_record(&aad, &draft.payload)?;
                draft.sealed = true;
            }
        }
        Ok(draft)
    }

    /// Opens a queued mutation's payload for replay.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] without a live key, or
    /// [`CryptoError::AuthenticationFailed`] for a damaged payload.
    pub fn open_mutation(&self, mut mutation: Mutation) -> CryptoResult<Mutation> {
        if !mutation.sealed {
            return Ok(mutation);
        }
        let key = self.key.as_ref().ok_or(CryptoError::Locked)?;
        let aad = mutation_aad(&mutation.target, &mutation.mutation_id);
        mutation.payload = key.decrypt_record(&aad, &mutation.payload)?;
        mutation.sealed = false;
        Ok(mutation)
    }

    /// Reads and opens one entity.
    ///
    /// # Errors
    ///
    /// Fails like [`open_entity`](Self::open_entity).
    pub fn get(&self, container: &ContainerId, id: &str) -> CryptoResult<Option<CachedEntity>> {
        self.store
            .get(container, id)
            .map(|e| self.open_entity(e))
            .transpose()
    }

    /// Seals and stores one entity.
    ///
    /// # Errors
    ///
    /// Returns a crypto or store error; nothing is written on failure.
    pub fn put(&self, entity: CachedEntity) -> CryptoResult<()> {
        let entity = self.seal_entity(entity)?;
        Ok(self.store.put(entity)?)
    }

    /// Returns the opened entities of `container` whose clear fields match
    /// `predicate`. Records that fail authentication are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] if sealed records exist and the key
    /// was locked.
    pub fn query<P>(&self, container: &ContainerId, predicate: P) -> CryptoResult<Vec<CachedEntity>>
    where
        P: Fn(&CachedEntity) -> bool,
    {
        let mut opened = Vec::new();
        for entity in self.store.query(container, predicate) {
            let id = entity.id.clone();
            match self.open_entity(entity) {
                Ok(e) => opened.push(e),
                Err(CryptoError::AuthenticationFailed) => {
                    warn!(container = %container, id = %id, "skipping record that failed authentication");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(opened)
    }

    /// Seals and queues a mutation.
    ///
    /// # Errors
    ///
    /// Returns a crypto error or [`StoreError::QueueFull`].
    pub fn enqueue(&self, draft: MutationDraft) -> CryptoResult<u64> {
        let draft = self.seal_draft(draft)?;
        Ok(self.store.enqueue_mutation(draft)?)
    }

    /// Runs a transaction whose writes are sealed before the commit.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error or a store error converted into `E`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut SecureTxn<'_, '_>) -> Result<T, E>,
        E: From<StoreError> + From<CryptoError>,
    {
        self.store.transaction(|inner| {
            let mut txn = SecureTxn { inner, secure: self };
            f(&mut txn)
        })
    }
}

/// A transaction that seals payloads as they are written.
pub struct SecureTxn<'t, 's> {
    inner: &'t mut StoreTxn<'s>,
    secure: &'t SecureStore,
}

impl SecureTxn<'_, '_> {
    /// Reads and opens an entity, including this transaction's writes.
    ///
    /// # Errors
    ///
    /// Fails like [`SecureStore::open_entity`].
    pub fn get(&self, container: &ContainerId, id: &str) -> CryptoResult<Option<CachedEntity>> {
        self.inner
            .get(container, id)
            .map(|e| self.secure.open_entity(e))
            .transpose()
    }

    /// Returns true if the entity exists, without opening it.
    #[must_use]
    pub fn contains(&self, container: &ContainerId, id: &str) -> bool {
        self.inner.get(container, id).is_some()
    }

    /// Seals and upserts an entity.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] if the key was locked.
    pub fn put(&mut self, entity: CachedEntity) -> CryptoResult<()> {
        let entity = self.secure.seal_entity(entity)?;
        self.inner.put(entity);
        Ok(())
    }

    /// Deletes an entity.
    pub fn delete(&mut self, container: &ContainerId, id: &str) {
        self.inner.delete(container, id);
    }

    /// Drops every entity of a container and its cursor.
    pub fn clear_container(&mut self, container: &ContainerId) {
        self.inner.clear_container(container);
    }

    /// Reads a cursor.
    #[must_use]
    pub fn cursor(&self, container: &ContainerId) -> Option<SyncCursor> {
        self.inner.cursor(container)
    }

    /// Advances a cursor.
    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.inner.set_cursor(cursor);
    }

    /// Seals and queues a mutation.
    ///
    /// # Errors
    ///
    /// Returns a crypto error or [`StoreError::QueueFull`].
    pub fn enqueue(&mut self, draft: MutationDraft) -> CryptoResult<u64> {
        let draft = self.secure.seal_draft(draft)?;
        Ok(self.inner.enqueue(draft)?)
    }

    /// Reads a queued mutation, still sealed.
    #[must_use]
    pub fn mutation(&self, seq: u64) -> Option<Mutation> {
        self.inner.mutation(seq)
    }

    /// Replaces a queued mutation's bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn update_mutation(&mut self, mutation: Mutation) -> CryptoResult<()> {
        Ok(self.inner.update_mutation(mutation)?)
    }

    /// Removes a confirmed mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn dequeue(&mut self, seq: u64) -> CryptoResult<Mutation> {
        Ok(self.inner.dequeue(seq)?)
    }

    /// Moves a mutation to the dead-letter set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MutationNotFound`] if it is not queued.
    pub fn dead_letter(&mut self, seq: u64, reason: &str, now_ms: u64) -> CryptoResult<DeadLetterEntry> {
        Ok(self.inner.dead_letter(seq, reason, now_ms)?)
    }
}
