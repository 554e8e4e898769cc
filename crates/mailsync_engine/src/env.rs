//! The capabilities the engine needs from its host.

use crate::http::FetchError;
use async_trait::async_trait;
use mailsync_crypto::SecureStore;
use mailsync_protocol::{ApiRequest, ApiResponse, HostMessage};
use std::time::{SystemTime, UNIX_EPOCH};

/// Host capabilities injected into [`crate::SyncEngine`].
///
/// The engine behaves identically whatever implementation it is given.
/// `fetch` is the only operation that suspends.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Sends a request to the remote API.
    async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, FetchError>;

    /// The account store, sealing payloads when unlocked.
    fn store(&self) -> &SecureStore;

    /// Notifies the host UI. Never blocks and never fails.
    fn emit(&self, message: HostMessage);

    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
