//! Record encryption properties.

use mailsync_crypto::{entity_aad, CryptoError, KeyHandle, SecureStore};
use mailsync_storage::InMemoryBackend;
use mailsync_store::{CachedEntity, DurableStore, EntityKey, MutationDraft, MutationKind, StoreConfig};
use mailsync_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

fn unlocked_key() -> KeyHandle {
    TestAccount::memory().key
}

fn aad_for(id: &str) -> Vec<u8> {
    entity_aad(&EntityKey::new(inbox(), id))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn decrypt_returns_exact_plaintext(
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
        aad in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let key = unlocked_key();
        let sealed = key.encrypt_record(&aad, &plaintext).unwrap();
        prop_assert_eq!(key.decrypt_record(&aad, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn any_flipped_byte_fails_authentication(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        position in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let key = unlocked_key();
        let aad = aad_for("m1");
        let mut sealed = key.encrypt_record(&aad, &plaintext).unwrap();
        let at = position.index(sealed.len());
        sealed[at] ^= mask;

        prop_assert!(matches!(
            key.decrypt_record(&aad, &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn records_are_bound_to_their_identity(
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
        id in entity_id_strategy(),
    ) {
        prop_assume!(id != "m1");
        let key = unlocked_key();
        let sealed = key.encrypt_record(&aad_for("m1"), &plaintext).unwrap();
        prop_assert!(matches!(
            key.decrypt_record(&aad_for(&id), &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }
}

#[test]
fn medium_never_holds_plaintext() {
    let medium = InMemoryBackend::new();
    let store = Arc::new(DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap());
    let account = TestAccount::on_store(Arc::clone(&store));
    let secure = SecureStore::sealed(store, account.key.clone());

    let needle = b"merger term sheet";
    secure
        .put(CachedEntity::new("m1", inbox(), "v1", needle.to_vec()))
        .unwrap();
    secure
        .enqueue(MutationDraft::new(
            MutationKind::Update,
            EntityKey::new(inbox(), "m1"),
            needle.to_vec(),
        ))
        .unwrap();

    let bytes = medium.data();
    assert!(!bytes.is_empty());
    assert!(!bytes.windows(needle.len()).any(|window| window == needle));
}
