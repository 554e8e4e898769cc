//! Record types held by the store.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The kind of entity cached for an account. Each kind is its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// A mail message.
    Message,
    /// A mail folder.
    Folder,
    /// An address-book contact.
    Contact,
    /// A calendar event.
    CalendarEvent,
}

impl EntityKind {
    /// Every entity kind.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Message,
        EntityKind::Folder,
        EntityKind::Contact,
        EntityKind::CalendarEvent,
    ];

    /// The collection name, also used as the remote API path segment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "messages",
            Self::Folder => "folders",
            Self::Contact => "contacts",
            Self::CalendarEvent => "events",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StoreError::InvalidContainer {
                value: s.to_string(),
            })
    }
}

/// A sync container: the unit of pull, cursor and drain.
///
/// Displayed and parsed as `"{kind}/{name}"`, e.g. `messages/INBOX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId {
    /// Entity kind held by the container.
    pub kind: EntityKind,
    /// Folder, address-book or calendar name.
    pub name: String,
}

impl ContainerId {
    /// Creates a container id.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for ContainerId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidContainer {
            value: s.to_string(),
        };
        let (kind, name) = s.split_once('/').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        let kind = kind.parse().map_err(|_| invalid())?;
        Ok(Self::new(kind, name))
    }
}

/// Address of one entity: its container plus its remote identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Parent container.
    pub container: ContainerId,
    /// Stable remote identifier.
    pub id: String,
}

impl EntityKey {
    /// Creates an entity key.
    pub fn new(container: ContainerId, id: impl Into<String>) -> Self {
        Self {
            container,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.id)
    }
}

/// Local mirror of one server entity.
///
/// `(container, id)` is unique: entities are upserted, never duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntity {
    /// Stable remote identifier.
    pub id: String,
    /// Parent container.
    pub container: ContainerId,
    /// Server version marker (etag, modseq or last-modified).
    pub version: String,
    /// Queryable fields, always stored in clear.
    pub index: BTreeMap<String, String>,
    /// Opaque body; the unit of encryption.
    pub payload: Vec<u8>,
    /// Whether `payload` is ciphertext.
    pub sealed: bool,
}

impl CachedEntity {
    /// Creates an unsealed entity with an empty index.
    pub fn new(
        id: impl Into<String>,
        container: ContainerId,
        version: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            container,
            version: version.into(),
            index: BTreeMap::new(),
            payload,
            sealed: false,
        }
    }

    /// Adds an index field.
    #[must_use]
    pub fn with_index(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.index.insert(key.into(), value.into());
        self
    }

    /// Returns this entity's key.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.container.clone(), self.id.clone())
    }
}

/// What a queued mutation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Create a new entity.
    Create,
    /// Replace an entity's content.
    Update,
    /// Delete an entity.
    Delete,
    /// Move an entity to another container of the same kind.
    Move {
        /// Target container.
        destination: ContainerId,
    },
}

impl MutationKind {
    /// Short name used in logs and the CLI.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move { .. } => "move",
        }
    }
}

/// A local write waiting to be queued. The store assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationDraft {
    /// Idempotency key sent with every replay.
    pub mutation_id: Uuid,
    /// Operation.
    pub kind: MutationKind,
    /// Entity the operation applies to.
    pub target: EntityKey,
    /// Request body.
    pub payload: Vec<u8>,
    /// Whether `payload` is ciphertext.
    pub sealed: bool,
    /// Wall-clock time the write was made.
    pub enqueued_at_ms: u64,
}

impl MutationDraft {
    /// Creates a draft with a fresh idempotency key.
    pub fn new(kind: MutationKind, target: EntityKey, payload: Vec<u8>) -> Self {
        Self {
            mutation_id: Uuid::new_v4(),
            kind,
            target,
            payload,
            sealed: false,
            enqueued_at_ms: 0,
        }
    }

    /// Sets the enqueue timestamp.
    #[must_use]
    pub fn with_enqueued_at(mut self, now_ms: u64) -> Self {
        self.enqueued_at_ms = now_ms;
        self
    }
}

/// A queued local write not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Store-assigned, monotonic, never reused.
    pub seq: u64,
    /// Idempotency key.
    pub mutation_id: Uuid,
    /// Operation.
    pub kind: MutationKind,
    /// Entity the operation applies to.
    pub target: EntityKey,
    /// Request body.
    pub payload: Vec<u8>,
    /// Whether `payload` is ciphertext.
    pub sealed: bool,
    /// Failed replay attempts so far.
    pub retry_count: u32,
    /// Earliest time the next replay may run.
    pub next_retry_at_ms: u64,
    /// Wall-clock time the write was made.
    pub enqueued_at_ms: u64,
    /// Last replay failure, if any.
    pub last_error: Option<String>,
}

impl Mutation {
    pub(crate) fn from_draft(seq: u64, draft: MutationDraft) -> Self {
        Self {
            seq,
            mutation_id: draft.mutation_id,
            kind: draft.kind,
            target: draft.target,
            payload: draft.payload,
            sealed: draft.sealed,
            retry_count: 0,
            next_retry_at_ms: 0,
            enqueued_at_ms: draft.enqueued_at_ms,
            last_error: None,
        }
    }

    /// Returns true if the mutation may be replayed at `now_ms`.
    #[must_use]
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.next_retry_at_ms <= now_ms
    }
}

/// A mutation that failed terminally. Only operator action changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The failed mutation, as it was when it failed.
    pub mutation: Mutation,
    /// Why it was dead-lettered.
    pub reason: String,
    /// When it was dead-lettered.
    pub failed_at_ms: u64,
}

/// Per-container pull position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Container the cursor belongs to.
    pub container: ContainerId,
    /// Opaque server token.
    pub token: String,
    /// When the cursor last advanced.
    pub updated_at_ms: u64,
}

/// How the key-encryption key is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfDescriptor {
    /// Argon2id over a PIN.
    Pin {
        /// Memory cost in KiB.
        memory_kib: u32,
        /// Iteration count.
        iterations: u32,
        /// Lanes.
        parallelism: u32,
    },
    /// HKDF-SHA256 over a WebAuthn PRF output.
    Passkey {
        /// Credential the PRF output belongs to.
        credential_id: Vec<u8>,
    },
}

/// The account's wrapped data key. Exactly one per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVaultRecord {
    /// DEK sealed under the KEK.
    pub wrapped_dek: Vec<u8>,
    /// KDF salt.
    pub salt: Vec<u8>,
    /// KDF in use.
    pub kdf: KdfDescriptor,
    /// When the vault was first written.
    pub created_at_ms: u64,
    /// When the DEK was last re-wrapped.
    pub rotated_at_ms: u64,
}

/// Persisted brute-force state for unlock attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    /// Consecutive failed unlocks.
    pub failed_attempts: u32,
    /// Unlock is refused until this time.
    pub locked_until_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_display_and_parse() {
        let inbox = ContainerId::new(EntityKind::Message, "INBOX");
        assert_eq!(inbox.to_string(), "messages/INBOX");
        assert_eq!("messages/INBOX".parse::<ContainerId>().unwrap(), inbox);

        let nested: ContainerId = "messages/Archive/2024".parse().unwrap();
        assert_eq!(nested.name, "Archive/2024");
    }

    #[test]
    fn container_parse_rejects_garbage() {
        assert!("INBOX".parse::<ContainerId>().is_err());
        assert!("letters/INBOX".parse::<ContainerId>().is_err());
        assert!("messages/".parse::<ContainerId>().is_err());
    }

    #[test]
    fn drafts_get_distinct_ids() {
        let key = EntityKey::new(ContainerId::new(EntityKind::Contact, "default"), "c1");
        let a = MutationDraft::new(MutationKind::Create, key.clone(), vec![]);
        let b = MutationDraft::new(MutationKind::Create, key, vec![]);
        assert_ne!(a.mutation_id, b.mutation_id);
    }

    #[test]
    fn mutation_due() {
        let key = EntityKey::new(ContainerId::new(EntityKind::Folder, "root"), "f");
        let mut m = Mutation::from_draft(1, MutationDraft::new(MutationKind::Delete, key, vec![]));
        assert!(m.is_due(0));
        m.next_retry_at_ms = 500;
        assert!(!m.is_due(499));
        assert!(m.is_due(500));
    }
}
