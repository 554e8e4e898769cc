//! Realtime change notifications.

use crate::error::{ProtocolError, ProtocolResult};
use mailsync_store::ContainerId;
use serde::{Deserialize, Serialize};

/// A push notification that something changed server-side. It only names
/// what changed; the engine pulls to learn how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Container in `kind/name` form.
    pub container: String,
    /// Changed entity, when known.
    #[serde(default)]
    pub entity_id: Option<String>,
}

impl RealtimeEvent {
    /// Creates an event.
    pub fn new(container: &ContainerId, entity_id: Option<String>) -> Self {
        Self {
            container: container.to_string(),
            entity_id,
        }
    }

    /// Parses an event from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON.
    pub fn from_json(body: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Returns the affected container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not `kind/name`.
    pub fn container_id(&self) -> ProtocolResult<ContainerId> {
        self.container
            .parse()
            .map_err(|e: mailsync_store::StoreError| ProtocolError::invalid_field("container", e.to_string()))
    }
}
