//! In-memory indexes rebuilt from the log.

use crate::log::LogOp;
use crate::store::LogCorruption;
use crate::types::{
    CachedEntity, ContainerId, DeadLetterEntry, KeyVaultRecord, LockoutRecord, Mutation,
    SyncCursor,
};
use std::collections::BTreeMap;

#[derive(Debug)]
pub(crate) struct StoreState {
    pub entities: BTreeMap<ContainerId, BTreeMap<String, CachedEntity>>,
    pub mutations: BTreeMap<u64, Mutation>,
    pub dead_letters: BTreeMap<u64, DeadLetterEntry>,
    pub cursors: BTreeMap<ContainerId, SyncCursor>,
    pub vault: Option<KeyVaultRecord>,
    pub lockout: LockoutRecord,
    /// Next sequence number to hand out. Never goes backwards.
    pub next_seq: u64,
    pub frames: u64,
    pub corruption: Option<LogCorruption>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            mutations: BTreeMap::new(),
            dead_letters: BTreeMap::new(),
            cursors: BTreeMap::new(),
            vault: None,
            lockout: LockoutRecord::default(),
            next_seq: 1,
            frames: 0,
            corruption: None,
        }
    }
}

impl StoreState {
    pub fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::PutEntity(entity) => {
                self.entities
                    .entry(entity.container.clone())
                    .or_default()
                    .insert(entity.id.clone(), entity);
            }
            LogOp::DeleteEntity { container, id } => {
                if let Some(items) = self.entities.get_mut(&container) {
                    items.remove(&id);
                }
            }
            LogOp::ClearContainer(container) => {
                self.entities.remove(&container);
                self.cursors.remove(&container);
            }
            LogOp::PutMutation(mutation) => {
                self.bump_seq(mutation.seq);
                self.mutations.insert(mutation.seq, mutation);
            }
            LogOp::RemoveMutation { seq } => {
                self.mutations.remove(&seq);
            }
            LogOp::PutDeadLetter(entry) => {
                self.bump_seq(entry.mutation.seq);
                self.dead_letters.insert(entry.mutation.seq, entry);
            }
            LogOp::RemoveDeadLetter { seq } => {
                self.dead_letters.remove(&seq);
            }
            LogOp::PutCursor(cursor) => {
                self.cursors.insert(cursor.container.clone(), cursor);
            }
            LogOp::PutVault(record) => self.vault = Some(record),
            LogOp::ClearVault => self.vault = None,
            LogOp::PutLockout(record) => self.lockout = record,
        }
    }

    fn bump_seq(&mut self, seq: u64) {
        self.next_seq = self.next_seq.max(seq.saturating_add(1));
    }

    pub fn entity(&self, container: &ContainerId, id: &str) -> Option<&CachedEntity> {
        self.entities.get(container).and_then(|items| items.get(id))
    }
}
