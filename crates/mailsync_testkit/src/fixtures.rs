//! Test fixtures and account helpers.
//!
//! Provides stores, unlocked accounts and sample records so tests can
//! skip the setup ceremony.

use mailsync_crypto::{AppLock, KdfParams, KeyHandle, Secret, SecureStore};
use mailsync_store::{
    CachedEntity, ContainerId, DurableStore, EntityKey, EntityKind, MutationDraft, MutationKind,
    StoreConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// PIN used by [`TestAccount`].
pub const TEST_PIN: &str = "2468";

/// Argon2id parameters cheap enough for unoptimised test builds.
pub fn cheap_kdf() -> KdfParams {
    KdfParams::default().with_memory_kib(1024).with_iterations(1)
}

/// An app lock over `store` using [`cheap_kdf`].
pub fn app_lock(store: Arc<DurableStore>) -> AppLock {
    AppLock::new(store).with_kdf_params(cheap_kdf())
}

/// A fresh in-memory store.
pub fn memory_store() -> Arc<DurableStore> {
    Arc::new(DurableStore::open_in_memory().expect("Failed to open in-memory store"))
}

/// An account whose vault is set up and unlocked with [`TEST_PIN`].
pub struct TestAccount {
    /// The underlying store.
    pub store: Arc<DurableStore>,
    /// App lock over the store.
    pub lock: AppLock,
    /// The unlocked data key.
    pub key: KeyHandle,
    /// Store view sealing payloads with `key`.
    pub secure: SecureStore,
}

impl TestAccount {
    /// Creates an account on a fresh in-memory store.
    pub fn memory() -> Self {
        Self::on_store(memory_store())
    }

    /// Creates an account on an in-memory store with `config`.
    pub fn with_config(config: StoreConfig) -> Self {
        let backend = Box::new(mailsync_storage::InMemoryBackend::new());
        let store = DurableStore::open(backend, config).expect("Failed to open store");
        Self::on_store(Arc::new(store))
    }

    /// Sets up the vault on `store` and unlocks it.
    pub fn on_store(store: Arc<DurableStore>) -> Self {
        let lock = app_lock(Arc::clone(&store));
        let key = lock
            .setup(&Secret::pin(TEST_PIN), 0)
            .expect("Failed to set up vault");
        let secure = SecureStore::sealed(Arc::clone(&store), key.clone());
        Self {
            store,
            lock,
            key,
            secure,
        }
    }
}

/// A file-backed store in a temporary directory.
pub struct TempStore {
    /// The open store.
    pub store: Arc<DurableStore>,
    path: PathBuf,
    _dir: TempDir,
}

impl TempStore {
    /// Opens a new store file.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("account").join("store.log");
        let store = DurableStore::open_file(&path, StoreConfig::default()).expect("Failed to open store file");
        Self {
            store: Arc::new(store),
            path,
            _dir: dir,
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes and reopens the store, replaying its log.
    ///
    /// Panics if another clone of `store` is still alive, since the file
    /// lock is only released when the last one drops.
    pub fn reopen(self) -> Self {
        let Self { store, path, _dir } = self;
        drop(store);
        let store = DurableStore::open_file(&path, StoreConfig::default()).expect("Failed to reopen store file");
        Self {
            store: Arc::new(store),
            path,
            _dir,
        }
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The `messages/INBOX` container.
pub fn inbox() -> ContainerId {
    ContainerId::new(EntityKind::Message, "INBOX")
}

/// The `messages/Archive` container.
pub fn archive() -> ContainerId {
    ContainerId::new(EntityKind::Message, "Archive")
}

/// The `events/primary` container.
pub fn calendar() -> ContainerId {
    ContainerId::new(EntityKind::CalendarEvent, "primary")
}

/// A message with an indexed subject.
pub fn message(id: &str, subject: &str) -> CachedEntity {
    let payload = serde_json::json!({ "subject": subject, "body": format!("body of {id}") });
    CachedEntity::new(id, inbox(), "v1", payload.to_string().into_bytes()).with_index("subject", subject)
}

/// A create mutation for `id` in `container`.
pub fn create_draft(container: &ContainerId, id: &str) -> MutationDraft {
    let payload = serde_json::json!({ "id": id, "subject": "draft" });
    MutationDraft::new(
        MutationKind::Create,
        EntityKey::new(container.clone(), id),
        payload.to_string().into_bytes(),
    )
}

/// An update mutation for `id` carrying `payload`.
pub fn update_draft(container: &ContainerId, id: &str, payload: serde_json::Value) -> MutationDraft {
    MutationDraft::new(
        MutationKind::Update,
        EntityKey::new(container.clone(), id),
        payload.to_string().into_bytes(),
    )
}

/// A delete mutation for `id`.
pub fn delete_draft(container: &ContainerId, id: &str) -> MutationDraft {
    MutationDraft::new(MutationKind::Delete, EntityKey::new(container.clone(), id), Vec::new())
}

/// A move mutation for `id` to `destination`.
pub fn move_draft(container: &ContainerId, id: &str, destination: &ContainerId) -> MutationDraft {
    MutationDraft::new(
        MutationKind::Move {
            destination: destination.clone(),
        },
        EntityKey::new(container.clone(), id),
        Vec::new(),
    )
}
