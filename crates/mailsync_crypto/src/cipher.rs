//! XChaCha20-Poly1305 sealing.
//!
//! Output format: `nonce (24 bytes) || ciphertext || tag (16 bytes)`.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KEY_SIZE;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

/// Size of the XChaCha20 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts `plaintext` under `key` with a fresh random nonce, binding `aad`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the cipher fails.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend(ciphertext);
    Ok(result)
}

/// Decrypts data produced by [`seal`] with the same key and `aad`.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] on a wrong key, wrong
/// associated data, tampering or truncation.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let (nonce, body) = sealed.split_at(NONCE_SIZE);

    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: body, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];

    #[test]
    fn seal_then_open() {
        let sealed = seal(&KEY, b"Dear Bob", b"messages/INBOX/m1").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 8 + TAG_SIZE);
        assert_eq!(open(&KEY, &sealed, b"messages/INBOX/m1").unwrap(), b"Dear Bob");
    }

    #[test]
    fn nonces_are_fresh() {
        let a = seal(&KEY, b"same", b"").unwrap();
        let b = seal(&KEY, b"same", b"").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn wrong_aad_fails() {
        let sealed = seal(&KEY, b"body", b"messages/INBOX/m1").unwrap();
        assert!(matches!(
            open(&KEY, &sealed, b"messages/INBOX/m2"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&KEY, b"body", b"").unwrap();
        assert!(matches!(
            open(&[0x43; KEY_SIZE], &sealed, b""),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampering_fails() {
        let mut sealed = seal(&KEY, b"body", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(open(&KEY, &sealed, b"").is_err());
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            open(&KEY, &[0u8; NONCE_SIZE + TAG_SIZE - 1], b""),
            Err(CryptoError::AuthenticationFailed)
        ));
    }
}
