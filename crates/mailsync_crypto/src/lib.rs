//! # mailsync_crypto
//!
//! Client-side envelope encryption for a mailsync account.
//!
//! - A random 256-bit **data key** (DEK) encrypts record payloads with
//!   XChaCha20-Poly1305. Index fields stay in clear so queries still work.
//! - A **key-encryption key** (KEK) derived from a PIN (Argon2id) or a passkey
//!   PRF output (HKDF-SHA256) wraps the DEK in the account's vault record.
//!   The KEK is never persisted.
//! - [`AppLock`] unlocks, rotates and resets the vault and enforces a
//!   persisted brute-force lockout.
//! - [`KeyHandle`] is the unlocked capability. [`KeyHandle::lock`] zeroizes
//!   the DEK in place.
//! - [`SecureStore`] wraps a [`DurableStore`](mailsync_store::DurableStore)
//!   and seals on write, opens on read.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod app_lock;
mod cipher;
mod error;
mod handle;
mod key;
mod secure_store;
mod vault;

pub use app_lock::{AppLock, LockoutPolicy};
pub use cipher::{open, seal, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use handle::KeyHandle;
pub use key::{
    derive_from_passkey, derive_from_pin, random_salt, DataKey, KdfParams, KeyEncryptionKey,
    KEY_SIZE, SALT_SIZE,
};
pub use secure_store::{entity_aad, mutation_aad, SecureStore, SecureTxn};
pub use vault::{create_vault, open_vault, Secret};
