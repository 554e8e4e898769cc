//! Messages emitted to the host UI.

use serde::{Deserialize, Serialize};

/// Kind of host message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostMessageKind {
    /// A cycle started for a container.
    SyncStarted,
    /// A cycle finished.
    SyncCompleted,
    /// A cycle failed.
    SyncFailed,
    /// A mutation was dead-lettered.
    MutationFailed,
    /// The store is corrupt; sync is paused.
    DbError,
}

/// A fire-and-forget status message for the host UI.
///
/// Serialized as `{"type": "...", "container": "...", "detail": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: HostMessageKind,
    /// Container in `kind/name` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HostMessage {
    /// Creates a message.
    pub fn new(kind: HostMessageKind, container: Option<String>, detail: Option<String>) -> Self {
        Self {
            kind,
            container,
            detail,
        }
    }

    /// `syncStarted` for a container.
    pub fn sync_started(container: impl ToString) -> Self {
        Self::new(HostMessageKind::SyncStarted, Some(container.to_string()), None)
    }

    /// `syncCompleted` for a container.
    pub fn sync_completed(container: impl ToString, detail: impl Into<String>) -> Self {
        Self::new(
            HostMessageKind::SyncCompleted,
            Some(container.to_string()),
            Some(detail.into()),
        )
    }

    /// `syncFailed` for a container.
    pub fn sync_failed(container: impl ToString, detail: impl Into<String>) -> Self {
        Self::new(
            HostMessageKind::SyncFailed,
            Some(container.to_string()),
            Some(detail.into()),
        )
    }

    /// `mutationFailed` for a container.
    pub fn mutation_failed(container: impl ToString, detail: impl Into<String>) -> Self {
        Self::new(
            HostMessageKind::MutationFailed,
            Some(container.to_string()),
            Some(detail.into()),
        )
    }

    /// `dbError`.
    pub fn db_error(detail: impl Into<String>) -> Self {
        Self::new(HostMessageKind::DbError, None, Some(detail.into()))
    }

    /// Encodes as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let msg = HostMessage::mutation_failed("messages/INBOX", "422 invalid");
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"mutationFailed","container":"messages/INBOX","detail":"422 invalid"}"#
        );
    }

    #[test]
    fn db_error_has_no_container() {
        let json = HostMessage::db_error("corrupt at 0").to_json().unwrap();
        assert_eq!(json, r#"{"type":"dbError","detail":"corrupt at 0"}"#);
        let back: HostMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, HostMessageKind::DbError);
    }
}
