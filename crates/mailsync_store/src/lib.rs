//! # mailsync_store
//!
//! Durable, transactional document store backing one mail account.
//!
//! The store keeps:
//! - the cached mirror of server entities (messages, folders, contacts, events)
//! - the outgoing mutation queue and the dead-letter set
//! - one sync cursor per container
//! - the key vault record and the unlock lockout record
//!
//! Everything is persisted as an append-only log of transaction frames on a
//! [`StorageBackend`](mailsync_storage::StorageBackend). One frame is one
//! transaction; replay on open rebuilds the in-memory indexes.
//!
//! ```rust
//! use mailsync_store::{CachedEntity, ContainerId, DurableStore, EntityKind};
//!
//! let store = DurableStore::open_in_memory().unwrap();
//! let inbox = ContainerId::new(EntityKind::Message, "INBOX");
//! store.put(CachedEntity::new("m1", inbox.clone(), "v1", b"hello".to_vec())).unwrap();
//! assert!(store.get(&inbox, "m1").is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod log;
mod state;
mod store;
mod txn;
mod types;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use log::{compute_crc32, FrameType, LogOp, LOG_MAGIC, LOG_VERSION};
pub use store::{
    verify_medium, DurableStore, LogCorruption, RecoveryReport, StoreStats, VerifyReport,
};
pub use txn::StoreTxn;
pub use types::{
    CachedEntity, ContainerId, DeadLetterEntry, EntityKey, EntityKind, KdfDescriptor,
    KeyVaultRecord, LockoutRecord, Mutation, MutationDraft, MutationKind, SyncCursor,
};
