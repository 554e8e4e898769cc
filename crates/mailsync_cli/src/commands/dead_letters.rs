//! Dead-letter commands: list, requeue, discard.

use super::{open_store, open_store_read_only};
use mailsync_engine::system_now_ms;
use mailsync_store::{ContainerId, DeadLetterEntry, DurableStore};
use serde::Serialize;
use std::path::Path;

/// One dead-letter entry, without its payload.
#[derive(Debug, Serialize)]
pub struct DeadLetterRow {
    /// Sequence number the mutation had in the queue.
    pub seq: u64,
    /// Idempotency key.
    pub mutation_id: String,
    /// Operation name.
    pub kind: String,
    /// `kind/name/id` of the target.
    pub target: String,
    /// Failed attempts.
    pub retry_count: u32,
    /// Why it was dead-lettered.
    pub reason: String,
    /// When it was dead-lettered.
    pub failed_at_ms: u64,
}

impl From<&DeadLetterEntry> for DeadLetterRow {
    fn from(entry: &DeadLetterEntry) -> Self {
        let m = &entry.mutation;
        Self {
            seq: m.seq,
            mutation_id: m.mutation_id.to_string(),
            kind: m.kind.name().to_string(),
            target: m.target.to_string(),
            retry_count: m.retry_count,
            reason: entry.reason.clone(),
            failed_at_ms: entry.failed_at_ms,
        }
    }
}

/// Collects rows, optionally for one container.
pub fn rows(store: &DurableStore, container: Option<&ContainerId>) -> Vec<DeadLetterRow> {
    let entries = match container {
        Some(container) => store.dead_letters_for(container),
        None => store.list_dead_letters(),
    };
    entries.iter().map(DeadLetterRow::from).collect()
}

/// Lists dead letters.
pub fn list(path: &Path, container: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let container = container.map(str::parse::<ContainerId>).transpose()?;
    let store = open_store_read_only(path)?;
    let rows = rows(&store, container.as_ref());

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("No dead letters");
            }
            for row in &rows {
                println!(
                    "#{} {} {} after {} attempts: {}",
                    row.seq, row.kind, row.target, row.retry_count, row.reason
                );
            }
        }
    }
    Ok(())
}

/// Requeues one entry.
pub fn requeue(path: &Path, seq: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let new_seq = store.requeue_dead_letter(seq, system_now_ms())?;
    println!("Requeued #{seq} as #{new_seq}");
    Ok(())
}

/// Discards one entry.
pub fn discard(path: &Path, seq: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let entry = store.discard_dead_letter(seq)?;
    println!("Discarded #{seq} ({} {})", entry.mutation.kind.name(), entry.mutation.target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsync_store::{EntityKey, EntityKind, MutationDraft, MutationKind, StoreConfig};

    fn store_with_dead_letter(path: &Path) -> u64 {
        let store = DurableStore::open_file(path, StoreConfig::default()).unwrap();
        let inbox = ContainerId::new(EntityKind::Message, "INBOX");
        let seq = store
            .enqueue_mutation(MutationDraft::new(
                MutationKind::Update,
                EntityKey::new(inbox, "m1"),
                b"{}".to_vec(),
            ))
            .unwrap();
        store.move_to_dead_letter(seq, "HTTP 422", 5).unwrap();
        seq
    }

    #[test]
    fn rows_filter_by_container() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.log");
        store_with_dead_letter(&path);

        let store = open_store_read_only(&path).unwrap();
        let all = rows(&store, None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, "update");
        assert_eq!(all[0].reason, "HTTP 422");

        let archive = ContainerId::new(EntityKind::Message, "Archive");
        assert!(rows(&store, Some(&archive)).is_empty());
    }

    #[test]
    fn requeue_then_discard_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.log");
        let seq = store_with_dead_letter(&path);

        requeue(&path, seq).unwrap();
        assert!(discard(&path, seq).is_err());

        let store = open_store(&path).unwrap();
        assert!(store.list_dead_letters().is_empty());
        assert_eq!(store.list_mutations().len(), 1);
    }
}
