//! Remote API requests.

use mailsync_store::{ContainerId, EntityKind, Mutation, MutationKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use urlencoding::encode;

/// Header carrying the mutation's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to the remote API. `path` is relative to the API base URL and
/// includes any query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Path and query.
    pub path: String,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns the body as lossy UTF-8, truncated for error messages.
    #[must_use]
    pub fn body_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(200).collect()
    }
}

fn collection(kind: EntityKind) -> &'static str {
    kind.as_str()
}

/// Builds `GET /v1/{kind}/{container}/changes?cursor=..&limit=..`.
#[must_use]
pub fn pull_request(container: &ContainerId, cursor: Option<&str>, limit: u32) -> ApiRequest {
    let mut path = format!(
        "/v1/{}/{}/changes?",
        collection(container.kind),
        encode(&container.name)
    );
    if let Some(cursor) = cursor {
        path.push_str(&format!("cursor={}&", encode(cursor)));
    }
    path.push_str(&format!("limit={limit}"));
    ApiRequest::new(Method::Get, path)
}

/// Builds the replay request for a mutation whose payload is in clear.
///
/// | kind   | request                                   |
/// |--------|-------------------------------------------|
/// | create | `POST /v1/{kind}?container={name}`        |
/// | update | `PUT /v1/{kind}/{id}`                     |
/// | delete | `DELETE /v1/{kind}/{id}`                  |
/// | move   | `POST /v1/{kind}/{id}/move`               |
///
/// Every request carries the idempotency key.
#[must_use]
pub fn mutation_request(mutation: &Mutation) -> ApiRequest {
    let target = &mutation.target;
    let kind = collection(target.container.kind);
    let id = encode(&target.id);

    let request = match &mutation.kind {
        MutationKind::Create => ApiRequest::new(
            Method::Post,
            format!("/v1/{kind}?container={}", encode(&target.container.name)),
        )
        .with_body(mutation.payload.clone()),
        MutationKind::Update => ApiRequest::new(Method::Put, format!("/v1/{kind}/{id}"))
            .with_body(mutation.payload.clone()),
        MutationKind::Delete => ApiRequest::new(Method::Delete, format!("/v1/{kind}/{id}")),
        MutationKind::Move { destination } => {
            let body = serde_json::json!({
                "from": target.container.name,
                "destination": destination.name,
            });
            ApiRequest::new(Method::Post, format!("/v1/{kind}/{id}/move"))
                .with_body(body.to_string().into_bytes())
        }
    };
    request.with_header(IDEMPOTENCY_HEADER, mutation.mutation_id.to_string())
}
