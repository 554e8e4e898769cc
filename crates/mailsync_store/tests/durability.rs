//! Reopen and crash-durability tests for the store log.

use mailsync_storage::{InMemoryBackend, StorageBackend};
use mailsync_store::{
    CachedEntity, ContainerId, DurableStore, EntityKey, EntityKind, MutationDraft, MutationKind,
    StoreConfig, StoreError,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn inbox() -> ContainerId {
    ContainerId::new(EntityKind::Message, "INBOX")
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, Vec<u8>),
    Delete(u8),
    Enqueue(u8),
    DequeueOldest,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, prop::collection::vec(any::<u8>(), 0..32)).prop_map(|(id, p)| Op::Put(id, p)),
        (0u8..8).prop_map(Op::Delete),
        (0u8..8).prop_map(Op::Enqueue),
        Just(Op::DequeueOldest),
    ]
}

fn run(store: &DurableStore, op: &Op) {
    match op {
        Op::Put(id, payload) => store
            .put(CachedEntity::new(format!("m{id}"), inbox(), "1", payload.clone()))
            .unwrap(),
        Op::Delete(id) => store.delete(&inbox(), &format!("m{id}")).unwrap(),
        Op::Enqueue(id) => {
            store
                .enqueue_mutation(MutationDraft::new(
                    MutationKind::Update,
                    EntityKey::new(inbox(), format!("m{id}")),
                    vec![*id],
                ))
                .unwrap();
        }
        Op::DequeueOldest => {
            if let Some(first) = store.list_mutations().first() {
                store.dequeue_mutation(first.seq).unwrap();
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reopen_reproduces_state(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let medium = InMemoryBackend::new();
        let (entities, mutations, max_seq) = {
            let store = DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap();
            let mut max_seq = 0;
            for op in &ops {
                run(&store, op);
                if let Some(last) = store.list_mutations().last() {
                    max_seq = max_seq.max(last.seq);
                }
            }
            (store.query(&inbox(), |_| true), store.list_mutations(), max_seq)
        };

        let store = DurableStore::open(Box::new(medium), StoreConfig::default()).unwrap();
        prop_assert_eq!(store.query(&inbox(), |_| true), entities);
        prop_assert_eq!(store.list_mutations(), mutations);

        let next = store
            .enqueue_mutation(MutationDraft::new(
                MutationKind::Create,
                EntityKey::new(inbox(), "fresh"),
                vec![],
            ))
            .unwrap();
        prop_assert!(next > max_seq);
    }

    #[test]
    fn any_truncation_leaves_a_prefix(cut in 0usize..4096) {
        let medium = InMemoryBackend::new();
        {
            let store = DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap();
            for i in 0..10u8 {
                store.put(CachedEntity::new(format!("m{i}"), inbox(), "1", vec![i; 16])).unwrap();
            }
        }
        let full = medium.data();
        let cut = cut.min(full.len());
        let torn = InMemoryBackend::with_data(full[..cut].to_vec());

        let store = DurableStore::open(Box::new(torn), StoreConfig::default()).unwrap();
        prop_assert!(store.corruption().is_none());
        let kept = store.query(&inbox(), |_| true);
        for (i, entity) in kept.iter().enumerate() {
            prop_assert_eq!(&entity.id, &format!("m{i}"));
        }
    }
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("acct").join("store.mslog");

    {
        let store = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
        store.put(CachedEntity::new("m1", inbox(), "1", b"hi".to_vec())).unwrap();
        store
            .enqueue_mutation(MutationDraft::new(
                MutationKind::Delete,
                EntityKey::new(inbox(), "m1"),
                vec![],
            ))
            .unwrap();
    }

    let store = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
    assert_eq!(store.get(&inbox(), "m1").unwrap().payload, b"hi");
    assert_eq!(store.list_mutations().len(), 1);
}

#[test]
fn second_open_of_same_file_is_refused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.mslog");

    let _first = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
    let second = DurableStore::open_file(&path, StoreConfig::default());
    assert!(matches!(
        second,
        Err(StoreError::Storage(mailsync_storage::StorageError::Locked))
    ));
}

#[test]
fn crc_mismatch_in_the_middle_is_corruption() {
    let medium = InMemoryBackend::new();
    {
        let store = DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap();
        for i in 0..3u8 {
            store.put(CachedEntity::new(format!("m{i}"), inbox(), "1", vec![i])).unwrap();
        }
    }
    let third = medium.size().unwrap() as usize / 3;
    medium.corrupt_byte(third + 15);

    let store = DurableStore::open(Box::new(medium), StoreConfig::default()).unwrap();
    let verify = store.verify().unwrap();
    assert!(verify.corruption.is_some());
    assert!(store.get(&inbox(), "m0").is_some());
    assert!(store.put(CachedEntity::new("x", inbox(), "1", vec![])).unwrap_err().is_corruption());
}

#[test]
fn damaged_length_mid_log_is_reported_not_truncated() {
    let medium = InMemoryBackend::new();
    let first_len;
    {
        let store = DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap();
        store.put(CachedEntity::new("m1", inbox(), "1", vec![1])).unwrap();
        first_len = medium.size().unwrap() as usize;
        store.put(CachedEntity::new("m2", inbox(), "1", vec![2])).unwrap();
        store.put(CachedEntity::new("m3", inbox(), "1", vec![3])).unwrap();
    }
    let size_before = medium.size().unwrap();
    // High byte of the second frame's length field.
    medium.corrupt_byte(first_len + 10);

    let store = DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap();
    let corruption = store.corruption().expect("damaged length must be reported");
    assert_eq!(corruption.offset, first_len as u64);
    assert_eq!(medium.size().unwrap(), size_before);
    assert!(store.get(&inbox(), "m1").is_some());
    assert!(store.put(CachedEntity::new("m4", inbox(), "1", vec![])).unwrap_err().is_corruption());
}

#[test]
fn read_only_open_leaves_torn_tail_and_refuses_writes() {
    let medium = InMemoryBackend::new();
    {
        let store = DurableStore::open(Box::new(medium.clone()), StoreConfig::default()).unwrap();
        store.put(CachedEntity::new("m1", inbox(), "1", vec![])).unwrap();
    }
    let mut writer = medium.clone();
    writer.append(b"MSLG\x01\x00\x01\xff\x00").unwrap();
    let torn_len = medium.size().unwrap();

    let config = StoreConfig::default().with_read_only(true);
    let store = DurableStore::open(Box::new(medium.clone()), config).unwrap();
    assert!(store.get(&inbox(), "m1").is_some());
    assert_eq!(medium.size().unwrap(), torn_len);

    assert!(matches!(
        store.put(CachedEntity::new("m2", inbox(), "1", vec![])),
        Err(StoreError::ReadOnly)
    ));
    assert!(matches!(store.recover(), Err(StoreError::ReadOnly)));
    assert!(matches!(store.wipe(), Err(StoreError::ReadOnly)));
    assert_eq!(medium.size().unwrap(), torn_len);
}
