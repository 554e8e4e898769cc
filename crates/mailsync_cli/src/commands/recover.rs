//! Recover command implementation.

use super::{format_size, open_store};
use mailsync_storage::FileBackend;
use mailsync_store::verify_medium;
use std::path::Path;

/// Runs the recover command. A dry run only reads the file.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    if dry_run {
        if !path.is_file() {
            return Err(format!("No account store found at {}", path.display()).into());
        }
        let report = verify_medium(&FileBackend::open_existing(path)?)?;
        let discard = report.total_bytes - report.valid_bytes;
        println!("Would keep {} frames and discard {}", report.frames, format_size(discard));
        return Ok(());
    }

    let store = open_store(path)?;
    let report = store.recover()?;
    if report.bytes_discarded == 0 {
        println!("Store is clean: {} frames", report.frames_kept);
    } else {
        println!(
            "Kept {} frames, discarded {}",
            report.frames_kept,
            format_size(report.bytes_discarded)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsync_store::{CachedEntity, ContainerId, DurableStore, EntityKind, StoreConfig};
    use std::io::Write;

    #[test]
    fn dry_run_leaves_torn_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
            let inbox = ContainerId::new(EntityKind::Message, "INBOX");
            store.put(CachedEntity::new("m1", inbox, "v1", vec![])).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"MSLG\x01\x00\x01\xff\x00").unwrap();
        drop(file);
        let torn_len = std::fs::metadata(&path).unwrap().len();

        run(&path, true).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), torn_len);

        run(&path, false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn recover_cuts_damaged_frame() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.log");
        let inbox = ContainerId::new(EntityKind::Message, "INBOX");
        {
            let store = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
            store.put(CachedEntity::new("m1", inbox.clone(), "v1", vec![])).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"XXXXXXXXXXXXXXXXXXXXXXXX").unwrap();
        drop(file);

        run(&path, true).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > good_len);

        run(&path, false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        let store = open_store(&path).unwrap();
        assert!(store.get(&inbox, "m1").is_some());
        assert!(store.corruption().is_none());
    }
}
