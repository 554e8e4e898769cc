//! Store configuration.

/// Default bound on the number of queued mutations.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 10_000;

/// Configuration for opening a [`DurableStore`](crate::DurableStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of mutations allowed in the queue.
    pub max_queue_len: usize,

    /// Whether to sync the medium on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Open without ever changing the medium: a torn tail is left in place
    /// and every write is refused.
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            sync_on_commit: true,
            read_only: false,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mutation queue bound.
    #[must_use]
    pub const fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn with_sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn with_read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }
}
