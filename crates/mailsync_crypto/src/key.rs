//! Key types and derivation.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use mailsync_store::KdfDescriptor;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of data and key-encryption keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of KDF salts in bytes.
pub const SALT_SIZE: usize = 16;

const PASSKEY_INFO: &[u8] = b"mailsync-kek-passkey-v1";

/// The account's data-encryption key.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeySize {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    /// Returns the key bytes. Never log or persist them.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A key-encryption key, derived on demand and never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl KeyEncryptionKey {
    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyEncryptionKey([REDACTED])")
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iterations.
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Interactive cost: 64 MiB, 3 iterations, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Sets the memory cost.
    #[must_use]
    pub const fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    /// Sets the iteration count.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the lane count.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Describes these parameters for the vault record.
    #[must_use]
    pub fn descriptor(&self) -> KdfDescriptor {
        KdfDescriptor::Pin {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

/// Generates a random KDF salt.
#[must_use]
pub fn random_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derives a KEK from a PIN with Argon2id.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] on invalid parameters or salt.
pub fn derive_from_pin(
    pin: &str,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<KeyEncryptionKey> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut kek = KeyEncryptionKey {
        bytes: [0u8; KEY_SIZE],
    };
    argon
        .hash_password_into(pin.as_bytes(), salt, &mut kek.bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(kek)
}

/// Derives a KEK from a WebAuthn PRF output with HKDF-SHA256.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if the PRF output is empty.
pub fn derive_from_passkey(prf_output: &[u8], salt: &[u8]) -> CryptoResult<KeyEncryptionKey> {
    if prf_output.is_empty() {
        return Err(CryptoError::KeyDerivation("empty PRF output".into()));
    }
    let hk = Hkdf::<Sha256>::new(Some(salt), prf_output);
    let mut kek = KeyEncryptionKey {
        bytes: [0u8; KEY_SIZE],
    };
    hk.expand(PASSKEY_INFO, &mut kek.bytes)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".into()))?;
    Ok(kek)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams::default().with_memory_kib(1024).with_iterations(1)
    }

    #[test]
    fn default_params_are_interactive() {
        let params = KdfParams::default();
        assert_eq!(params.memory_kib, 65_536);
        assert_eq!(params.iterations, 3);
        assert_eq!(params.parallelism, 1);
    }

    #[test]
    fn pin_derivation_is_deterministic() {
        let salt = [7u8; SALT_SIZE];
        let a = derive_from_pin("1234", &salt, &cheap()).unwrap();
        let b = derive_from_pin("1234", &salt, &cheap()).unwrap();
        let c = derive_from_pin("1235", &salt, &cheap()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn salt_changes_pin_key() {
        let a = derive_from_pin("1234", &[1u8; SALT_SIZE], &cheap()).unwrap();
        let b = derive_from_pin("1234", &[2u8; SALT_SIZE], &cheap()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn short_salt_is_rejected() {
        let err = derive_from_pin("1234", &[1u8; 4], &cheap()).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn passkey_derivation() {
        let salt = random_salt();
        let a = derive_from_passkey(&[9u8; 32], &salt).unwrap();
        let b = derive_from_passkey(&[9u8; 32], &salt).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert!(derive_from_passkey(&[], &salt).is_err());
    }

    #[test]
    fn data_key_size_checked() {
        assert!(DataKey::from_bytes(&[0u8; 31]).is_err());
        assert!(DataKey::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn debug_redacts() {
        let key = DataKey::generate();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
