//! # mailsync Sync Engine
//!
//! Offline sync engine for the mailsync account store.
//!
//! This crate provides:
//! - Per-container state machine (idle → pulling → applying → draining → idle)
//! - Cursor-based incremental pull, applied page by page
//! - Mutation replay queue with retry, backoff and dead-lettering
//! - Cooperative cancellation and coalescing of concurrent requests
//! - Host environment abstraction with background and foreground adapters
//! - A trigger bridge for reconnect, visibility, heartbeat and realtime events
//!
//! ## Architecture
//!
//! A cycle pulls before it drains:
//! 1. Fetch pages of remote changes since the container's cursor
//! 2. Write each page and its new cursor in one store transaction
//! 3. Replay queued mutations in sequence order
//!
//! ## Key Invariants
//!
//! - At most one cycle per container at a time
//! - The cursor never advances past unapplied changes
//! - Mutations of one entity are replayed in enqueue order
//! - Dead-lettered mutations are never replayed automatically
//! - A corrupt store pauses the engine until it is recovered

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapters;
mod bridge;
mod config;
mod engine;
mod env;
mod error;
mod http;
mod state;

pub use adapters::{BackgroundAdapter, ForegroundAdapter, MessageCallback};
pub use bridge::{BridgeConfig, BridgeHandle, HostAdapter, HostCapabilities, SyncBridge, Trigger};
pub use config::{RetryConfig, SyncConfig};
pub use engine::SyncEngine;
pub use env::{system_now_ms, Environment};
pub use error::{SyncError, SyncResult};
pub use http::{FetchError, HttpClient, ReqwestClient};
pub use state::{
    ContainerReport, ContainerSelector, SyncOutcome, SyncPhase, SyncReport, SyncStatus,
};
