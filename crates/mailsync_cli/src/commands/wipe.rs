//! Wipe command implementation.

use super::open_store;
use std::path::Path;
use tracing::warn;

/// Runs the wipe command. Refuses unless `confirmed`.
pub fn run(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err("Refusing to wipe without --yes".into());
    }
    let store = open_store(path)?;
    let stats = store.stats()?;
    warn!(path = %path.display(), "wiping account store");
    store.wipe()?;
    println!(
        "Wiped {} entities, {} pending mutations and {} dead letters",
        stats.entities, stats.pending_mutations, stats.dead_letters
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsync_store::{CachedEntity, ContainerId, DurableStore, EntityKind, StoreConfig};

    #[test]
    fn wipe_needs_confirmation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
            let inbox = ContainerId::new(EntityKind::Message, "INBOX");
            store.put(CachedEntity::new("m1", inbox, "v1", vec![])).unwrap();
        }

        assert!(run(&path, false).is_err());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        run(&path, true).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
