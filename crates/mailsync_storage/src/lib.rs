//! # mailsync storage
//!
//! The medium one account's log is written to.
//!
//! A medium stores bytes and nothing else: the store crate owns framing,
//! checksums and encryption. Two media exist:
//!
//! - [`InMemoryBackend`] for ephemeral accounts and tests; clones share bytes
//!   so a reopen behaves like a restart.
//! - [`FileBackend`] for real accounts; the file is exclusively locked while
//!   open.
//!
//! Either can carry a byte quota. A frame that does not fit is refused whole
//! with [`StorageError::QuotaExceeded`], naming the medium.
//!
//! ```rust
//! use mailsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut medium = InMemoryBackend::new().with_quota(8);
//! medium.append(b"frame").unwrap();
//! assert!(medium.append(b"frame").unwrap_err().is_quota_exceeded());
//! assert_eq!(medium.read_all().unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
