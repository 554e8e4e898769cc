//! HTTP client abstraction.
//!
//! The engine never talks to the network directly. Both host adapters
//! forward requests to an [`HttpClient`]; [`ReqwestClient`] is the
//! production implementation and tests script their own.

use async_trait::async_trait;
use mailsync_protocol::{ApiRequest, ApiResponse, Method};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A request that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, DNS or TLS failure.
    #[error("network error: {0}")]
    Network(String),
    /// The request did not finish in time.
    #[error("request timed out")]
    Timeout,
}

/// Sends remote API requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the status and body.
    ///
    /// Non-2xx statuses are responses, not errors.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, FetchError>;
}

/// Sends a request, turning an elapsed `timeout` into [`FetchError::Timeout`].
pub(crate) async fn send_with_timeout(
    client: &dyn HttpClient,
    request: ApiRequest,
    timeout: Duration,
) -> Result<ApiResponse, FetchError> {
    match tokio::time::timeout(timeout, client.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout),
    }
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ReqwestClient {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the TLS backend cannot start.
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Sends `token` as a bearer credential on every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn fetch_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
        let url = self.url_for(&request.path);
        debug!(method = request.method.as_str(), %url, "sending request");

        let mut builder = self.client.request(reqwest_method(request.method), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(fetch_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(fetch_error)?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl HttpClient for Stalled {
        async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ApiResponse::new(200, Vec::new()))
        }
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = ReqwestClient::new("https://api.example.com/").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(
            client.url_for("/v1/messages/INBOX/changes?limit=10"),
            "https://api.example.com/v1/messages/INBOX/changes?limit=10"
        );
    }

    #[test]
    fn methods_map() {
        assert_eq!(reqwest_method(Method::Delete), reqwest::Method::DELETE);
        assert_eq!(reqwest_method(Method::Put), reqwest::Method::PUT);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_times_out() {
        let result = send_with_timeout(
            &Stalled,
            ApiRequest::new(Method::Get, "/v1/messages/INBOX/changes"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result, Err(FetchError::Timeout));
    }
}
