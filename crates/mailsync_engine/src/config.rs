//! Configuration for the sync engine.

use mailsync_store::ContainerId;
use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of deltas requested per pull page.
    pub pull_limit: u32,
    /// Maximum number of pages pulled in one cycle.
    pub max_pull_pages: u32,
    /// Timeout applied to every remote request.
    pub request_timeout: Duration,
    /// Retry policy for mutations and for failed cycles.
    pub retry: RetryConfig,
    /// Containers synced by `ContainerSelector::All` even before they
    /// hold any local state.
    pub containers: Vec<ContainerId>,
}

impl SyncConfig {
    /// Creates a configuration with the default limits.
    pub fn new() -> Self {
        Self {
            pull_limit: 100,
            max_pull_pages: 50,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            containers: Vec::new(),
        }
    }

    /// Sets the pull page size.
    pub fn with_pull_limit(mut self, limit: u32) -> Self {
        self.pull_limit = limit.max(1);
        self
    }

    /// Sets the maximum number of pages per cycle.
    pub fn with_max_pull_pages(mut self, pages: u32) -> Self {
        self.max_pull_pages = pages.max(1);
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Registers a container to sync.
    pub fn with_container(mut self, container: ContainerId) -> Self {
        if !self.containers.contains(&container) {
            self.containers.push(container);
        }
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts after which a mutation is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff. Finite and at least 1.0.
    #[serde(deserialize_with = "backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 become 1.0; non-finite
    /// values are ignored.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        if multiplier.is_finite() {
            self.backoff_multiplier = multiplier.max(1.0);
        }
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before retrying after `attempt` failures.
    ///
    /// The result never exceeds `max_delay` plus jitter, and saturates at
    /// `max_delay` when the arithmetic leaves the range of [`Duration`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max_secs = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = if base_delay.is_finite() {
            base_delay.clamp(0.0, max_secs)
        } else {
            max_secs
        };

        let total = if self.add_jitter && delay_secs > 0.0 {
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..=1.0)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(total).unwrap_or(self.max_delay)
    }

    /// Returns true once `failures` has reached the ceiling.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

fn backoff_multiplier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let multiplier = f64::deserialize(deserializer)?;
    if multiplier.is_finite() && multiplier >= 1.0 {
        Ok(multiplier)
    } else {
        Err(de::Error::custom(format!(
            "backoff_multiplier must be a finite number of at least 1.0, got {multiplier}"
        )))
    }
}
