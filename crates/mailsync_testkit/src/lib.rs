//! # mailsync Testkit
//!
//! Test utilities for mailsync.
//!
//! This crate provides:
//! - Account fixtures: stores, unlocked keys and sample records
//! - A storage backend that simulates a crash mid-write
//! - A scripted remote API with a manual clock
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mailsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replays_queued_update() {
//!     let account = TestAccount::memory();
//!     let env = ScriptedEnvironment::new(account.secure.clone());
//!     // ... build an engine over `env`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use remote::*;
