use std::time::Duration;

use autoflow_model::prelude::RetryPolicy;

/// Tunables for one scenario runner. The defaults are deliberate choices,
/// not observations; override them per deployment as needed.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Bound on `Call` nesting. Exceeding it aborts the run with
    /// `RecursionLimitExceeded`.
    pub max_call_depth: usize,
    /// Interval between condition polls of a `Wait` step. Each poll
    /// re-locates the element. Also used as the park interval while paused.
    pub wait_poll_interval: Duration,
    /// Retry policy applied to `Action` and `Assert` steps that do not carry
    /// their own. `Wait` steps are bounded by their own timeout and only
    /// retry when a policy is set explicitly on the step.
    pub default_retry: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 10,
            wait_poll_interval: Duration::from_millis(100),
            default_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of sessions executing concurrently.
    pub max_sessions: usize,
    /// When false, requests beyond capacity are rejected with
    /// `CapacityExceeded` instead of queuing.
    pub queue_requests: bool,
    pub runner: RunnerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            queue_requests: true,
            runner: RunnerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Interval between polls of the watched source for new content.
    pub poll_interval: Duration,
    /// Identical (rule, extracted-variables) matches within this window
    /// collapse to a single run request.
    pub debounce_window: Duration,
    /// Backoff after an I/O error, doubling up to the max.
    pub error_backoff_initial: Duration,
    pub error_backoff_max: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            debounce_window: Duration::from_secs(2),
            error_backoff_initial: Duration::from_secs(1),
            error_backoff_max: Duration::from_secs(30),
        }
    }
}
