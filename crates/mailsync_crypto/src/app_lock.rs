//! App Lock: unlock, rotate and reset the vault with brute-force lockout.

use crate::error::{CryptoError, CryptoResult};
use crate::handle::KeyHandle;
use crate::key::{DataKey, KdfParams};
use crate::vault::{create_vault, open_vault, Secret};
use mailsync_store::{DurableStore, LockoutRecord};
use std::sync::Arc;
use tracing::{info, warn};

/// Delay schedule applied after repeated failed unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures tolerated before the first delay.
    pub free_attempts: u32,
    /// Delays for each further failure; the last one repeats.
    pub delays_ms: Vec<u64>,
}

impl Default for LockoutPolicy {
    /// 3 failures: 30 s, 4: 60 s, 5 and more: 300 s.
    fn default() -> Self {
        Self {
            free_attempts: 2,
            delays_ms: vec![30_000, 60_000, 300_000],
        }
    }
}

impl LockoutPolicy {
    /// Sets the number of free attempts.
    #[must_use]
    pub fn with_free_attempts(mut self, attempts: u32) -> Self {
        self.free_attempts = attempts;
        self
    }

    /// Sets the delay schedule.
    #[must_use]
    pub fn with_delays_ms(mut self, delays: Vec<u64>) -> Self {
        self.delays_ms = delays;
        self
    }

    /// Returns the lockout imposed after `failures` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> u64 {
        if failures <= self.free_attempts {
            return 0;
        }
        let step = (failures - self.free_attempts - 1) as usize;
        self.delays_ms
            .get(step)
            .or_else(|| self.delays_ms.last())
            .copied()
            .unwrap_or(0)
    }
}

/// Guards the account's vault.
///
/// Failed attempts are written to the store, so the lockout survives
/// restarts.
#[derive(Debug, Clone)]
pub struct AppLock {
    store: Arc<DurableStore>,
    policy: LockoutPolicy,
    kdf: KdfParams,
}

impl AppLock {
    /// Creates an app lock over an account store with default policy and cost.
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            policy: LockoutPolicy::default(),
            kdf: KdfParams::default(),
        }
    }

    /// Sets the lockout policy.
    #[must_use]
    pub fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the Argon2id cost used for new PIN vaults.
    #[must_use]
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    /// Returns true if the account has a vault.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.store.vault_record().is_some()
    }

    /// Returns the persisted lockout state.
    #[must_use]
    pub fn lockout(&self) -> LockoutRecord {
        self.store.lockout()
    }

    /// Enables the app lock with a fresh data key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::VaultExists`] if already configured.
    pub fn setup(&self, secret: &Secret, now_ms: u64) -> CryptoResult<KeyHandle> {
        if self.is_configured() {
            return Err(CryptoError::VaultExists);
        }
        let dek = DataKey::generate();
        let record = create_vault(&dek, secret, &self.kdf, now_ms, now_ms)?;
        self.store.set_vault_record(record)?;
        info!("app lock configured");
        Ok(KeyHandle::new(dek))
    }

    /// Unlocks the vault.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::LockedOut`] while a lockout is running; no derivation
    ///   is attempted.
    /// - [`CryptoError::InvalidSecret`] on a wrong secret; the failure is
    ///   recorded.
    /// - [`CryptoError::VaultMissing`] if the app lock is not configured.
    pub fn unlock(&self, secret: &Secret, now_ms: u64) -> CryptoResult<KeyHandle> {
        let record = self.store.vault_record().ok_or(CryptoError::VaultMissing)?;

        let lockout = self.store.lockout();
        if now_ms < lockout.locked_until_ms {
            return Err(CryptoError::LockedOut {
                retry_after_ms: lockout.locked_until_ms - now_ms,
            });
        }

        match open_vault(&record, secret) {
            Ok(dek) => {
                if lockout != LockoutRecord::default() {
                    self.store.set_lockout(LockoutRecord::default())?;
                }
                info!("app unlocked");
                Ok(KeyHandle::new(dek))
            }
            Err(CryptoError::InvalidSecret) => {
                let failed_attempts = lockout.failed_attempts.saturating_add(1);
                let delay = self.policy.delay_for(failed_attempts);
                let locked_until_ms = if delay > 0 { now_ms + delay } else { 0 };
                self.store.set_lockout(LockoutRecord {
                    failed_attempts,
                    locked_until_ms,
                })?;
                warn!(failed_attempts, lockout_ms = delay, "unlock failed");
                Err(CryptoError::InvalidSecret)
            }
            Err(other) => Err(other),
        }
    }

    /// Re-wraps the data key under a new PIN. Stored records are untouched.
    ///
    /// # Errors
    ///
    /// Fails like [`unlock`](Self::unlock) if `current` is wrong.
    pub fn change_pin(&self, current: &Secret, new_pin: &str, now_ms: u64) -> CryptoResult<()> {
        self.rewrap(current, &Secret::pin(new_pin), now_ms)?;
        info!("PIN changed");
        Ok(())
    }

    /// Re-wraps the data key under a passkey PRF output.
    ///
    /// # Errors
    ///
    /// Fails like [`unlock`](Self::unlock) if `current` is wrong.
    pub fn switch_to_passkey(
        &self,
        current: &Secret,
        credential_id: &[u8],
        prf_output: &[u8],
        now_ms: u64,
    ) -> CryptoResult<()> {
        self.rewrap(current, &Secret::passkey(credential_id, prf_output), now_ms)?;
        info!("switched to passkey");
        Ok(())
    }

    fn rewrap(&self, current: &Secret, next: &Secret, now_ms: u64) -> CryptoResult<()> {
        let handle = self.unlock(current, now_ms)?;
        let created_at_ms = self
            .store
            .vault_record()
            .map_or(now_ms, |r| r.created_at_ms);
        let record = handle.with_key(|dek| create_vault(dek, next, &self.kdf, created_at_ms, now_ms))?;
        self.store.set_vault_record(record)?;
        handle.lock();
        Ok(())
    }

    /// Forgotten-secret reset: wipes the account store and writes a new vault
    /// around a new data key. Every previously stored record is lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the wipe or the vault write fails.
    pub fn reset(&self, secret: &Secret, now_ms: u64) -> CryptoResult<KeyHandle> {
        warn!("app lock reset, wiping account store");
        self.store.wipe()?;
        self.setup(secret, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_lock() -> AppLock {
        let store = Arc::new(DurableStore::open_in_memory().unwrap());
        AppLock::new(store).with_kdf_params(KdfParams::default().with_memory_kib(1024).with_iterations(1))
    }

    #[test]
    fn default_schedule() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.delay_for(1), 0);
        assert_eq!(policy.delay_for(2), 0);
        assert_eq!(policy.delay_for(3), 30_000);
        assert_eq!(policy.delay_for(4), 60_000);
        assert_eq!(policy.delay_for(5), 300_000);
        assert_eq!(policy.delay_for(9), 300_000);
    }

    #[test]
    fn setup_then_unlock() {
        let lock = app_lock();
        assert!(!lock.is_configured());
        let handle = lock.setup(&Secret::pin("1357"), 0).unwrap();
        let sealed = handle.encrypt_record(b"id", b"body").unwrap();

        let again = lock.unlock(&Secret::pin("1357"), 10).unwrap();
        assert_eq!(again.decrypt_record(b"id", &sealed).unwrap(), b"body");
        assert!(matches!(
            lock.setup(&Secret::pin("0000"), 0),
            Err(CryptoError::VaultExists)
        ));
    }

    #[test]
    fn unlock_without_vault() {
        assert!(matches!(
            app_lock().unlock(&Secret::pin("1"), 0),
            Err(CryptoError::VaultMissing)
        ));
    }

    #[test]
    fn third_failure_locks_out() {
        let lock = app_lock();
        lock.setup(&Secret::pin("1357"), 0).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                lock.unlock(&Secret::pin("0000"), 1_000),
                Err(CryptoError::InvalidSecret)
            ));
        }
        assert!(matches!(
            lock.unlock(&Secret::pin("0000"), 1_000),
            Err(CryptoError::InvalidSecret)
        ));
        assert_eq!(lock.lockout().locked_until_ms, 31_000);

        let err = lock.unlock(&Secret::pin("1357"), 11_000).unwrap_err();
        assert!(matches!(err, CryptoError::LockedOut { retry_after_ms: 20_000 }));

        lock.unlock(&Secret::pin("1357"), 31_000).unwrap();
        assert_eq!(lock.lockout(), LockoutRecord::default());
    }

    #[test]
    fn change_pin_keeps_data_key() {
        let lock = app_lock();
        let handle = lock.setup(&Secret::pin("1111"), 0).unwrap();
        let sealed = handle.encrypt_record(b"", b"kept").unwrap();

        lock.change_pin(&Secret::pin("1111"), "2222", 5).unwrap();
        assert!(lock.unlock(&Secret::pin("1111"), 6).is_err());
        let fresh = lock.unlock(&Secret::pin("2222"), 7).unwrap();
        assert_eq!(fresh.decrypt_record(b"", &sealed).unwrap(), b"kept");
    }

    #[test]
    fn switch_to_passkey() {
        let lock = app_lock();
        lock.setup(&Secret::pin("1111"), 0).unwrap();
        lock.switch_to_passkey(&Secret::pin("1111"), b"cred", &[3u8; 32], 1)
            .unwrap();

        assert!(lock.unlock(&Secret::pin("1111"), 2).is_err());
        lock.unlock(&Secret::passkey(b"cred".to_vec(), vec![3u8; 32]), 3)
            .unwrap();
    }

    #[test]
    fn reset_issues_new_key_and_wipes() {
        let lock = app_lock();
        let old = lock.setup(&Secret::pin("1111"), 0).unwrap();
        let sealed = old.encrypt_record(b"", b"gone").unwrap();

        let new = lock.reset(&Secret::pin("9999"), 10).unwrap();
        assert!(matches!(
            new.decrypt_record(b"", &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
        lock.unlock(&Secret::pin("9999"), 11).unwrap();
    }
}
