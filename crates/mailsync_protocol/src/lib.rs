//! # mailsync_protocol
//!
//! Boundary types between the sync core and the outside world:
//! - remote API requests and responses (pull pages, mutation replays)
//! - status classification of responses
//! - messages emitted to the host UI
//! - realtime change events
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod classify;
mod error;
mod host;
mod messages;
mod realtime;

pub use api::{mutation_request, pull_request, ApiRequest, ApiResponse, Method, IDEMPOTENCY_HEADER};
pub use classify::{classify_mutation, classify_pull, ResponseClass};
pub use error::{ProtocolError, ProtocolResult};
pub use host::{HostMessage, HostMessageKind};
pub use messages::{DeltaOp, PullResponse, RemoteDelta};
pub use realtime::RealtimeEvent;
