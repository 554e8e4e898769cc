//! Property-based test generators using proptest.

use mailsync_protocol::RemoteDelta;
use mailsync_store::{ContainerId, EntityKey, EntityKind, MutationDraft, MutationKind};
use proptest::prelude::*;

/// Strategy for entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for entity kinds.
pub fn entity_kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

/// Strategy for containers, including names with separators.
pub fn container_strategy() -> impl Strategy<Value = ContainerId> {
    (
        entity_kind_strategy(),
        prop::string::string_regex("[A-Za-z][A-Za-z0-9 _/-]{0,15}").expect("Invalid regex"),
    )
        .prop_map(|(kind, name)| ContainerId::new(kind, name))
}

/// Strategy for opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for mutation kinds within `container`'s entity kind.
pub fn mutation_kind_strategy(container: ContainerId) -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        Just(MutationKind::Create),
        Just(MutationKind::Update),
        Just(MutationKind::Delete),
        prop::string::string_regex("[A-Za-z]{1,8}")
            .expect("Invalid regex")
            .prop_map(move |name| MutationKind::Move {
                destination: ContainerId::new(container.kind, name),
            }),
    ]
}

/// Strategy for drafts targeting one of `ids` in `container`.
pub fn draft_strategy(container: ContainerId, ids: Vec<String>) -> impl Strategy<Value = MutationDraft> {
    (
        prop::sample::select(ids),
        mutation_kind_strategy(container.clone()),
        payload_strategy(),
    )
        .prop_map(move |(id, kind, payload)| {
            MutationDraft::new(kind, EntityKey::new(container.clone(), id), payload)
        })
}

/// Strategy for pulled deltas: mostly upserts, some deletes.
pub fn delta_strategy() -> impl Strategy<Value = RemoteDelta> {
    prop_oneof![
        3 => (entity_id_strategy(), 1u32..100, "[a-z ]{0,24}").prop_map(|(id, version, subject)| {
            RemoteDelta::upsert(id, version.to_string(), serde_json::json!({ "subject": subject }))
        }),
        1 => entity_id_strategy().prop_map(RemoteDelta::delete),
    ]
}
