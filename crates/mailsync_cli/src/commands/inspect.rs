//! Inspect command implementation.

use super::{format_size, open_store_read_only};
use mailsync_store::{DurableStore, KdfDescriptor};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store file path.
    pub path: String,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Committed frames.
    pub frames: u64,
    /// Cached entities.
    pub entities: usize,
    /// Queued mutations.
    pub pending_mutations: usize,
    /// Dead-letter entries.
    pub dead_letters: usize,
    /// Stored cursors.
    pub cursors: usize,
    /// How the vault is unlocked, if the app lock is on.
    pub app_lock: Option<String>,
    /// Consecutive failed unlocks.
    pub failed_unlocks: u32,
    /// Damage found at open; writes are refused until `recover`.
    pub corruption: Option<String>,
    /// Per-container state (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerState>>,
}

/// State of one container.
#[derive(Debug, Serialize)]
pub struct ContainerState {
    /// `kind/name`.
    pub container: String,
    /// Cached entities.
    pub entities: usize,
    /// Queued mutations targeting it.
    pub pending_mutations: usize,
    /// Dead-letter entries targeting it.
    pub dead_letters: usize,
    /// Pull position.
    pub cursor: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_containers: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store_read_only(path)?;
    let mut result = inspect(&store, show_containers)?;
    result.path = path.display().to_string();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result for an open store.
pub fn inspect(store: &DurableStore, show_containers: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let stats = store.stats()?;
    let app_lock = store.vault_record().map(|vault| match vault.kdf {
        KdfDescriptor::Pin { .. } => "pin".to_string(),
        KdfDescriptor::Passkey { .. } => "passkey".to_string(),
    });

    let containers = show_containers.then(|| {
        store
            .containers()
            .into_iter()
            .map(|container| ContainerState {
                entities: store.query(&container, |_| true).len(),
                pending_mutations: store.mutations_for(&container).len(),
                dead_letters: store.dead_letters_for(&container).len(),
                cursor: store.cursor(&container).map(|c| c.token),
                container: container.to_string(),
            })
            .collect()
    });

    Ok(InspectResult {
        path: String::new(),
        log_bytes: stats.log_bytes,
        frames: stats.frames,
        entities: stats.entities,
        pending_mutations: stats.pending_mutations,
        dead_letters: stats.dead_letters,
        cursors: stats.cursors,
        app_lock,
        failed_unlocks: store.lockout().failed_attempts,
        corruption: store.corruption().map(|c| c.to_string()),
        containers,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("mailsync Store Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Log:");
    println!("  Size:   {}", format_size(result.log_bytes));
    println!("  Frames: {}", result.frames);
    if let Some(corruption) = &result.corruption {
        println!("  DAMAGED: {corruption} (run `recover`)");
    }
    println!();
    println!("Records:");
    println!("  Entities:          {}", result.entities);
    println!("  Pending mutations: {}", result.pending_mutations);
    println!("  Dead letters:      {}", result.dead_letters);
    println!("  Cursors:           {}", result.cursors);
    println!();
    match &result.app_lock {
        Some(method) => println!("App lock: {method} ({} failed unlocks)", result.failed_unlocks),
        None => println!("App lock: off"),
    }

    if let Some(containers) = &result.containers {
        println!();
        println!("Containers:");
        for c in containers {
            println!(
                "  {} {} entities, {} pending, {} dead, cursor {}",
                c.container,
                c.entities,
                c.pending_mutations,
                c.dead_letters,
                c.cursor.as_deref().unwrap_or("-")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsync_store::{CachedEntity, ContainerId, EntityKey, EntityKind, MutationDraft, MutationKind};

    #[test]
    fn counts_per_container() {
        let store = DurableStore::open_in_memory().unwrap();
        let inbox = ContainerId::new(EntityKind::Message, "INBOX");
        store.put(CachedEntity::new("m1", inbox.clone(), "v1", vec![])).unwrap();
        store.put(CachedEntity::new("m2", inbox.clone(), "v1", vec![])).unwrap();
        store
            .enqueue_mutation(MutationDraft::new(
                MutationKind::Delete,
                EntityKey::new(inbox.clone(), "m1"),
                vec![],
            ))
            .unwrap();

        let result = inspect(&store, true).unwrap();
        assert_eq!(result.entities, 2);
        assert_eq!(result.pending_mutations, 1);
        assert_eq!(result.app_lock, None);
        assert!(result.corruption.is_none());

        let containers = result.containers.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].container, "messages/INBOX");
        assert_eq!(containers[0].entities, 2);
        assert_eq!(containers[0].pending_mutations, 1);
    }

    #[test]
    fn containers_omitted_unless_requested() {
        let store = DurableStore::open_in_memory().unwrap();
        let result = inspect(&store, false).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("containers").is_none());
    }
}
