//! Wrapping the data key under a PIN- or passkey-derived KEK.

use crate::cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_from_passkey, derive_from_pin, random_salt, DataKey, KdfParams, KeyEncryptionKey};
use mailsync_store::{KdfDescriptor, KeyVaultRecord};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const VAULT_AAD: &[u8] = b"mailsync-vault-v1";

/// A secret that unlocks the vault.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub enum Secret {
    /// A user PIN.
    Pin(String),
    /// A WebAuthn PRF output for a registered credential.
    Passkey {
        /// Credential the output came from.
        credential_id: Vec<u8>,
        /// PRF output.
        prf_output: Vec<u8>,
    },
}

impl Secret {
    /// Creates a PIN secret.
    pub fn pin(pin: impl Into<String>) -> Self {
        Self::Pin(pin.into())
    }

    /// Creates a passkey secret.
    pub fn passkey(credential_id: impl Into<Vec<u8>>, prf_output: impl Into<Vec<u8>>) -> Self {
        Self::Passkey {
            credential_id: credential_id.into(),
            prf_output: prf_output.into(),
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pin(_) => f.write_str("Secret::Pin([REDACTED])"),
            Self::Passkey { .. } => f.write_str("Secret::Passkey([REDACTED])"),
        }
    }
}

fn derive_kek(secret: &Secret, kdf: &KdfDescriptor, salt: &[u8]) -> CryptoResult<KeyEncryptionKey> {
    match (secret, kdf) {
        (
            Secret::Pin(pin),
            KdfDescriptor::Pin {
                memory_kib,
                iterations,
                parallelism,
            },
        ) => {
            let params = KdfParams {
                memory_kib: *memory_kib,
                iterations: *iterations,
                parallelism: *parallelism,
            };
            derive_from_pin(pin, salt, &params)
        }
        (
            Secret::Passkey {
                credential_id,
                prf_output,
            },
            KdfDescriptor::Passkey {
                credential_id: expected,
            },
        ) => {
            if credential_id != expected {
                return Err(CryptoError::InvalidSecret);
            }
            derive_from_passkey(prf_output, salt)
        }
        _ => Err(CryptoError::InvalidSecret),
    }
}

/// Wraps `dek` under a KEK derived from `secret`, producing a vault record.
///
/// `params` applies to PIN secrets only.
///
/// # Errors
///
/// Returns an error if derivation or sealing fails.
pub fn create_vault(
    dek: &DataKey,
    secret: &Secret,
    params: &KdfParams,
    created_at_ms: u64,
    now_ms: u64,
) -> CryptoResult<KeyVaultRecord> {
    let salt = random_salt();
    let kdf = match secret {
        Secret::Pin(_) => params.descriptor(),
        Secret::Passkey { credential_id, .. } => KdfDescriptor::Passkey {
            credential_id: credential_id.clone(),
        },
    };
    let kek = derive_kek(secret, &kdf, &salt)?;
    let wrapped_dek = cipher::seal(kek.as_bytes(), dek.as_bytes(), VAULT_AAD)?;

    Ok(KeyVaultRecord {
        wrapped_dek,
        salt,
        kdf,
        created_at_ms,
        rotated_at_ms: now_ms,
    })
}

/// Unwraps the data key from a vault record.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidSecret`] if the secret does not match.
pub fn open_vault(record: &KeyVaultRecord, secret: &Secret) -> CryptoResult<DataKey> {
    let kek = derive_kek(secret, &record.kdf, &record.salt)?;
    let plain = cipher::open(kek.as_bytes(), &record.wrapped_dek, VAULT_AAD)
        .map(Zeroizing::new)
        .map_err(|err| match err {
            CryptoError::AuthenticationFailed => CryptoError::InvalidSecret,
            other => other,
        })?;
    drop(kek);
    DataKey::from_bytes(&plain)
}
