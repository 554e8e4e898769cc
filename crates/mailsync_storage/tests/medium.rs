//! Append-only behaviour shared by every medium.

use mailsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use proptest::prelude::*;
use tempfile::tempdir;

/// Appends `frames` under `quota`, checking offsets and the quota as it goes,
/// and returns the bytes that were accepted.
fn append_all(medium: &mut dyn StorageBackend, frames: &[Vec<u8>], quota: u64) -> Vec<u8> {
    let mut accepted = Vec::new();
    for frame in frames {
        let before = medium.size().unwrap();
        match medium.append(frame) {
            Ok(at) => {
                assert_eq!(at, before);
                accepted.extend_from_slice(frame);
            }
            Err(err) => {
                assert!(err.is_quota_exceeded());
                assert!(before + frame.len() as u64 > quota);
                assert_eq!(medium.size().unwrap(), before);
            }
        }
        assert!(medium.size().unwrap() <= quota);
    }
    accepted
}

fn frames() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..48), 0..24)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn memory_log_holds_exactly_the_accepted_frames(frames in frames(), quota in 0u64..600) {
        let medium = InMemoryBackend::new().with_quota(quota);
        let accepted = append_all(&mut medium.clone(), &frames, quota);
        prop_assert_eq!(medium.read_all().unwrap(), accepted);
    }

    #[test]
    fn file_log_holds_exactly_the_accepted_frames(frames in frames(), quota in 0u64..600) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.mslog");
        let accepted = {
            let mut log = FileBackend::open(&path).unwrap().with_quota(quota);
            let accepted = append_all(&mut log, &frames, quota);
            log.sync().unwrap();
            accepted
        };

        let log = FileBackend::open_existing(&path).unwrap();
        prop_assert_eq!(log.read_all().unwrap(), accepted);
    }

    #[test]
    fn truncate_keeps_a_prefix(frames in frames(), cut in any::<prop::sample::Index>()) {
        let mut medium = InMemoryBackend::new();
        let accepted = append_all(&mut medium, &frames, u64::MAX);
        let keep = cut.index(accepted.len() + 1);

        medium.truncate(keep as u64).unwrap();
        prop_assert_eq!(medium.read_all().unwrap(), &accepted[..keep]);
    }
}
