//! Sync state and reporting types.

use mailsync_store::ContainerId;
use serde::Serialize;

/// Phase of a container's sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No cycle running.
    #[default]
    Idle,
    /// Fetching a page of remote changes.
    Pulling,
    /// Writing a fetched page to the store.
    Applying,
    /// Replaying queued mutations.
    Draining,
    /// The last cycle failed; waiting out the backoff.
    Error,
}

impl SyncPhase {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Pulling | SyncPhase::Applying | SyncPhase::Draining)
    }
}

/// Which containers an operation covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContainerSelector {
    /// Every container with local state plus every registered container.
    #[default]
    All,
    /// A single container.
    One(ContainerId),
    /// An explicit list.
    Many(Vec<ContainerId>),
}

impl From<ContainerId> for ContainerSelector {
    fn from(container: ContainerId) -> Self {
        ContainerSelector::One(container)
    }
}

/// How a container's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SyncOutcome {
    /// The run finished.
    Completed,
    /// The container is backing off after failures; nothing ran.
    Deferred {
        /// When the backoff ends.
        until_ms: u64,
    },
    /// The run was cancelled; unapplied results were discarded.
    Cancelled,
    /// The engine is paused after store corruption; nothing ran.
    Paused,
    /// The run failed.
    Failed {
        /// Error description.
        error: String,
    },
}

/// What a run did for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerReport {
    /// The container.
    pub container: ContainerId,
    /// How the run ended.
    pub outcome: SyncOutcome,
    /// True if this caller joined a run started by another caller.
    pub coalesced: bool,
    /// Deltas applied from pulled pages.
    pub pulled: usize,
    /// Mutations the server confirmed.
    pub replayed: usize,
    /// Mutations that failed and were rescheduled.
    pub retried: usize,
    /// Mutations moved to the dead-letter set.
    pub dead_lettered: usize,
    /// Mutations skipped because they are not due or wait behind
    /// an earlier mutation of the same entity.
    pub held_back: usize,
}

impl ContainerReport {
    pub(crate) fn new(container: ContainerId) -> Self {
        Self {
            container,
            outcome: SyncOutcome::Completed,
            coalesced: false,
            pulled: 0,
            replayed: 0,
            retried: 0,
            dead_lettered: 0,
            held_back: 0,
        }
    }

    pub(crate) fn with_outcome(mut self, outcome: SyncOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Returns true if the run completed.
    pub fn is_completed(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }

    pub(crate) fn summary(&self) -> String {
        format!(
            "pulled {}, replayed {}, retried {}, dead-lettered {}",
            self.pulled, self.replayed, self.retried, self.dead_lettered
        )
    }
}

/// Reports for every container an operation covered, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Per-container reports.
    pub containers: Vec<ContainerReport>,
}

impl SyncReport {
    /// Returns the report for a container.
    pub fn get(&self, container: &ContainerId) -> Option<&ContainerReport> {
        self.containers.iter().find(|r| &r.container == container)
    }

    /// Returns true if every run completed.
    pub fn all_completed(&self) -> bool {
        self.containers.iter().all(ContainerReport::is_completed)
    }
}

/// Snapshot of a container's sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// The container.
    pub container: ContainerId,
    /// Current phase.
    pub phase: SyncPhase,
    /// Queued mutations targeting the container.
    pub pending_mutations: usize,
    /// Dead-lettered mutations targeting the container.
    pub dead_letters: usize,
    /// Stored cursor token.
    pub cursor: Option<String>,
    /// When the last cycle completed.
    pub last_synced_at_ms: Option<u64>,
    /// Error of the last failed cycle, cleared on success.
    pub last_error: Option<String>,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    /// When the current backoff ends.
    pub backoff_until_ms: Option<u64>,
    /// Whether the engine is paused after store corruption.
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsync_store::EntityKind;

    #[test]
    fn active_phases() {
        assert!(!SyncPhase::Idle.is_active());
        assert!(SyncPhase::Pulling.is_active());
        assert!(SyncPhase::Applying.is_active());
        assert!(SyncPhase::Draining.is_active());
        assert!(!SyncPhase::Error.is_active());
    }

    #[test]
    fn report_lookup() {
        let inbox = ContainerId::new(EntityKind::Message, "INBOX");
        let sent = ContainerId::new(EntityKind::Message, "Sent");
        let report = SyncReport {
            containers: vec![
                ContainerReport::new(inbox.clone()),
                ContainerReport::new(sent.clone()).with_outcome(SyncOutcome::Cancelled),
            ],
        };
        assert!(report.get(&inbox).unwrap().is_completed());
        assert_eq!(report.get(&sent).unwrap().outcome, SyncOutcome::Cancelled);
        assert!(!report.all_completed());
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_string(&SyncOutcome::Deferred { until_ms: 5 }).unwrap();
        assert_eq!(json, r#"{"outcome":"deferred","until_ms":5}"#);
    }
}
