//! Pull page bodies.

use crate::error::{ProtocolError, ProtocolResult};
use mailsync_store::{CachedEntity, ContainerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a delta does to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOp {
    /// Insert or replace.
    Upsert,
    /// Remove.
    Delete,
}

/// One server-side change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDelta {
    /// Operation.
    pub op: DeltaOp,
    /// Entity id.
    pub id: String,
    /// Server version marker.
    #[serde(default)]
    pub version: String,
    /// Queryable fields.
    #[serde(default)]
    pub index: BTreeMap<String, String>,
    /// Entity body.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl RemoteDelta {
    /// Creates an upsert delta.
    pub fn upsert(id: impl Into<String>, version: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            op: DeltaOp::Upsert,
            id: id.into(),
            version: version.into(),
            index: BTreeMap::new(),
            payload: Some(payload),
        }
    }

    /// Creates a delete delta.
    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            op: DeltaOp::Delete,
            id: id.into(),
            version: String::new(),
            index: BTreeMap::new(),
            payload: None,
        }
    }

    /// Adds an index field.
    #[must_use]
    pub fn with_index(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.index.insert(key.into(), value.into());
        self
    }

    /// Converts an upsert into the cached entity it describes. The payload
    /// is stored as its JSON bytes, unsealed.
    ///
    /// # Errors
    ///
    /// Returns an error for delete deltas or an empty id.
    pub fn into_entity(self, container: &ContainerId) -> ProtocolResult<CachedEntity> {
        if self.op != DeltaOp::Upsert {
            return Err(ProtocolError::invalid_field("op", "delete has no entity"));
        }
        if self.id.is_empty() {
            return Err(ProtocolError::invalid_field("id", "empty"));
        }
        let payload = match &self.payload {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        Ok(CachedEntity {
            id: self.id,
            container: container.clone(),
            version: self.version,
            index: self.index,
            payload,
            sealed: false,
        })
    }
}

/// One page of changes since a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changes in server order.
    #[serde(default)]
    pub deltas: Vec<RemoteDelta>,
    /// Cursor covering this page.
    pub next_cursor: String,
    /// Whether another page follows.
    #[serde(default)]
    pub has_more: bool,
}

impl PullResponse {
    /// Parses a page body.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or an empty cursor.
    pub fn from_json(body: &[u8]) -> ProtocolResult<Self> {
        let page: Self = serde_json::from_slice(body)?;
        if page.next_cursor.is_empty() {
            return Err(ProtocolError::invalid_field("next_cursor", "empty"));
        }
        Ok(page)
    }

    /// Encodes a page body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
