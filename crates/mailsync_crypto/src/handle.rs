//! The unlocked data-key capability.

use crate::cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key::DataKey;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroize;

struct KeySlot {
    key: DataKey,
    live: bool,
}

/// Capability to encrypt and decrypt one account's records.
///
/// Clones share one key slot. [`lock`](Self::lock) takes the slot's write
/// lock, so it waits for in-flight operations (which hold the read lock) and
/// no operation can observe a half-zeroized key. The key is also zeroized
/// when the last clone is dropped.
#[derive(Clone)]
pub struct KeyHandle {
    slot: Arc<RwLock<KeySlot>>,
}

impl KeyHandle {
    pub(crate) fn new(key: DataKey) -> Self {
        Self {
            slot: Arc::new(RwLock::new(KeySlot { key, live: true })),
        }
    }

    /// Returns true until [`lock`](Self::lock) is called.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.slot.read().live
    }

    /// Zeroizes the key in place. Every clone stops working.
    pub fn lock(&self) {
        let mut slot = self.slot.write();
        slot.key.zeroize();
        slot.live = false;
        debug!("data key zeroized");
    }

    /// Encrypts one record payload, binding `aad` (the record identity).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] after [`lock`](Self::lock).
    pub fn encrypt_record(&self, aad: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.with_key(|key| cipher::seal(key.as_bytes(), plaintext, aad))
    }

    /// Decrypts one record payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Locked`] after [`lock`](Self::lock), or
    /// [`CryptoError::AuthenticationFailed`] if the record does not verify.
    pub fn decrypt_record(&self, aad: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        self.with_key(|key| cipher::open(key.as_bytes(), sealed, aad))
    }

    pub(crate) fn with_key<T>(
        &self,
        f: impl FnOnce(&DataKey) -> CryptoResult<T>,
    ) -> CryptoResult<T> {
        let slot = self.slot.read();
        if !slot.live {
            return Err(CryptoError::Locked);
        }
        f(&slot.key)
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHandle")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
