//! A scripted remote API for engine tests.
//!
//! [`ScriptedEnvironment`] answers requests from per-route queues and falls
//! back to an empty pull page or a `200` mutation reply. It records every
//! request and host message and keeps a manual clock.

use async_trait::async_trait;
use mailsync_crypto::SecureStore;
use mailsync_engine::{Environment, FetchError};
use mailsync_protocol::{
    pull_request, ApiRequest, ApiResponse, HostMessage, HostMessageKind, Method, PullResponse,
    RemoteDelta,
};
use mailsync_store::ContainerId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Cursor returned by the default empty pull page.
pub const DEFAULT_CURSOR: &str = "head";

type Reply = Result<ApiResponse, FetchError>;

/// Environment backed by a scripted remote.
pub struct ScriptedEnvironment {
    store: SecureStore,
    clock: AtomicU64,
    mutation_status: AtomicU16,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<ApiRequest>>,
    messages: Mutex<Vec<HostMessage>>,
    gate: watch::Sender<bool>,
}

/// Route key: method plus path without the query string.
fn route(method: Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("{} {}", method.as_str(), path)
}

/// Path of a container's pull endpoint.
pub fn pull_path(container: &ContainerId) -> String {
    let request = pull_request(container, None, 1);
    request.path.split('?').next().unwrap_or_default().to_string()
}

impl ScriptedEnvironment {
    /// Creates an environment over `store` with the clock at 1 000 000 ms.
    pub fn new(store: SecureStore) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            store,
            clock: AtomicU64::new(1_000_000),
            mutation_status: AtomicU16::new(200),
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            gate,
        }
    }

    // --- clock ---

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.clock.fetch_add(ms, Ordering::SeqCst);
    }

    /// Sets the clock.
    pub fn set_now(&self, now_ms: u64) {
        self.clock.store(now_ms, Ordering::SeqCst);
    }

    // --- scripting ---

    /// Queues a reply for the next request to `method path`.
    pub fn script(&self, method: Method, path: &str, reply: Reply) {
        self.scripts
            .lock()
            .entry(route(method, path))
            .or_default()
            .push_back(reply);
    }

    /// Queues a status and body for the next request to `method path`.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: &[u8]) {
        self.script(method, path, Ok(ApiResponse::new(status, body.to_vec())));
    }

    /// Queues a transport failure for the next request to `method path`.
    pub fn fail(&self, method: Method, path: &str, error: FetchError) {
        self.script(method, path, Err(error));
    }

    /// Queues a pull page for `container`.
    pub fn script_page(&self, container: &ContainerId, deltas: Vec<RemoteDelta>, cursor: &str, has_more: bool) {
        let page = PullResponse {
            deltas,
            next_cursor: cursor.to_string(),
            has_more,
        };
        let body = page.to_json().expect("Failed to encode page");
        self.respond(Method::Get, &pull_path(container), 200, &body);
    }

    /// Queues a status for the next pull of `container`.
    pub fn script_pull_status(&self, container: &ContainerId, status: u16) {
        self.respond(Method::Get, &pull_path(container), status, b"");
    }

    /// Sets the status of unscripted mutation replies.
    pub fn set_mutation_status(&self, status: u16) {
        self.mutation_status.store(status, Ordering::SeqCst);
    }

    /// Makes fetches wait until [`Self::release_fetches`].
    pub fn hold_fetches(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held fetches complete.
    pub fn release_fetches(&self) {
        self.gate.send_replace(true);
    }

    // --- inspection ---

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Requests other than pulls, in order.
    pub fn mutation_requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method != Method::Get)
            .cloned()
            .collect()
    }

    /// Number of pulls of `container`.
    pub fn pull_count(&self, container: &ContainerId) -> usize {
        let key = route(Method::Get, &pull_path(container));
        self.requests
            .lock()
            .iter()
            .filter(|r| route(r.method, &r.path) == key)
            .count()
    }

    /// Every host message emitted, in order.
    pub fn messages(&self) -> Vec<HostMessage> {
        self.messages.lock().clone()
    }

    /// Kinds of the emitted host messages.
    pub fn message_kinds(&self) -> Vec<HostMessageKind> {
        self.messages.lock().iter().map(|m| m.kind).collect()
    }

    /// Waits until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        while self.requests.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn fallback(&self, request: &ApiRequest) -> ApiResponse {
        if request.method == Method::Get {
            let page = PullResponse {
                deltas: Vec::new(),
                next_cursor: DEFAULT_CURSOR.to_string(),
                has_more: false,
            };
            ApiResponse::new(200, page.to_json().expect("Failed to encode page"))
        } else {
            ApiResponse::new(self.mutation_status.load(Ordering::SeqCst), b"{}".to_vec())
        }
    }
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
        tokio::task::yield_now().await;
        self.requests.lock().push(request.clone());
        let scripted = self
            .scripts
            .lock()
            .get_mut(&route(request.method, &request.path))
            .and_then(VecDeque::pop_front);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        scripted.unwrap_or_else(|| Ok(self.fallback(&request)))
    }

    fn store(&self) -> &SecureStore {
        &self.store
    }

    fn emit(&self, message: HostMessage) {
        self.messages.lock().push(message);
    }

    fn now_ms(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{inbox, TestAccount};

    #[test]
    fn routes_ignore_query() {
        assert_eq!(
            route(Method::Get, "/v1/messages/INBOX/changes?cursor=a&limit=5"),
            "GET /v1/messages/INBOX/changes"
        );
        assert_eq!(pull_path(&inbox()), "/v1/messages/INBOX/changes");
    }

    #[tokio::test]
    async fn scripted_replies_then_fallback() {
        let env = ScriptedEnvironment::new(TestAccount::memory().secure);
        env.script_pull_status(&inbox(), 503);

        let first = env.fetch(pull_request(&inbox(), None, 10)).await.unwrap();
        assert_eq!(first.status, 503);
        let second = env.fetch(pull_request(&inbox(), Some("x"), 10)).await.unwrap();
        assert_eq!(second.status, 200);
        assert_eq!(PullResponse::from_json(&second.body).unwrap().next_cursor, DEFAULT_CURSOR);
        assert_eq!(env.pull_count(&inbox()), 2);
    }

    #[test]
    fn clock_is_manual() {
        let env = ScriptedEnvironment::new(TestAccount::memory().secure);
        env.advance(Duration::from_secs(2));
        assert_eq!(env.now_ms(), 1_002_000);
    }
}
