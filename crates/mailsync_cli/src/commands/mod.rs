//! CLI command implementations.

pub mod dead_letters;
pub mod inspect;
pub mod recover;
pub mod verify;
pub mod wipe;

use mailsync_storage::FileBackend;
use mailsync_store::{DurableStore, StoreConfig};
use std::path::Path;
use tracing::debug;

/// Opens an existing store file for writing. Never creates one.
///
/// A torn trailing frame is cut as part of opening.
pub fn open_store(path: &Path) -> Result<DurableStore, Box<dyn std::error::Error>> {
    open_with(path, StoreConfig::default())
}

/// Opens an existing store file without changing a byte of it.
pub fn open_store_read_only(path: &Path) -> Result<DurableStore, Box<dyn std::error::Error>> {
    open_with(path, StoreConfig::default().with_read_only(true))
}

fn open_with(path: &Path, config: StoreConfig) -> Result<DurableStore, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No account store found at {}", path.display()).into());
    }
    debug!(path = %path.display(), read_only = config.read_only, "opening account store");
    let store = DurableStore::open(Box::new(FileBackend::open_existing(path)?), config)?;
    if let Some(corruption) = store.corruption() {
        debug!(%corruption, "store log is damaged, writes refused");
    }
    Ok(store)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn missing_store_is_not_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("absent.log");
        assert!(open_store(&path).is_err());
        assert!(open_store_read_only(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn read_only_open_keeps_torn_tail() {
        use mailsync_store::{CachedEntity, ContainerId, EntityKind};
        use std::io::Write;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.log");
        let inbox = ContainerId::new(EntityKind::Message, "INBOX");
        {
            let store = DurableStore::open_file(&path, StoreConfig::default()).unwrap();
            store.put(CachedEntity::new("m1", inbox.clone(), "v1", vec![])).unwrap();
        }
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"MSLG\x01\x00\x01\xff\x00").unwrap();
        drop(file);
        let torn_len = std::fs::metadata(&path).unwrap().len();

        let store = open_store_read_only(&path).unwrap();
        assert!(store.get(&inbox, "m1").is_some());
        drop(store);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), torn_len);
    }
}
