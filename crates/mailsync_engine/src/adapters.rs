//! Concrete environments for the two host contexts.

use crate::env::{system_now_ms, Environment};
use crate::http::{send_with_timeout, FetchError, HttpClient};
use async_trait::async_trait;
use mailsync_crypto::SecureStore;
use mailsync_protocol::{ApiRequest, ApiResponse, HostMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Environment for a background-execution context.
///
/// Host messages are posted to a channel that the host drains and
/// forwards to its open windows.
pub struct BackgroundAdapter {
    client: Arc<dyn HttpClient>,
    store: SecureStore,
    outbox: mpsc::UnboundedSender<HostMessage>,
    timeout: Duration,
}

impl BackgroundAdapter {
    /// Creates the adapter and the receiving end of its message channel.
    pub fn new(
        client: Arc<dyn HttpClient>,
        store: SecureStore,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let adapter = Self {
            client,
            store,
            outbox,
            timeout,
        };
        (adapter, inbox)
    }
}

#[async_trait]
impl Environment for BackgroundAdapter {
    async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
        send_with_timeout(self.client.as_ref(), request, self.timeout).await
    }

    fn store(&self) -> &SecureStore {
        &self.store
    }

    fn emit(&self, message: HostMessage) {
        if self.outbox.send(message).is_err() {
            debug!("host message dropped, no receiver");
        }
    }

    fn now_ms(&self) -> u64 {
        system_now_ms()
    }
}

impl std::fmt::Debug for BackgroundAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundAdapter")
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Callback invoked with each host message.
pub type MessageCallback = Arc<dyn Fn(HostMessage) + Send + Sync>;

/// Environment for a timer-driven foreground context.
///
/// Host messages are delivered by calling the host's callback on the
/// engine's task.
pub struct ForegroundAdapter {
    client: Arc<dyn HttpClient>,
    store: SecureStore,
    on_message: MessageCallback,
    timeout: Duration,
}

impl ForegroundAdapter {
    /// Creates the adapter.
    pub fn new(
        client: Arc<dyn HttpClient>,
        store: SecureStore,
        timeout: Duration,
        on_message: impl Fn(HostMessage) + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            store,
            on_message: Arc::new(on_message),
            timeout,
        }
    }
}

#[async_trait]
impl Environment for ForegroundAdapter {
    async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
        send_with_timeout(self.client.as_ref(), request, self.timeout).await
    }

    fn store(&self) -> &SecureStore {
        &self.store
    }

    fn emit(&self, message: HostMessage) {
        (self.on_message)(message);
    }

    fn now_ms(&self) -> u64 {
        system_now_ms()
    }
}

impl std::fmt::Debug for ForegroundAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundAdapter")
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
