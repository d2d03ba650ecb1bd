use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// An expected test failure: assertion mismatch, exhausted retries on a
    /// transient error, or a wait that timed out.
    Failed,
    /// Not executed: an untaken conditional branch, or a step after the
    /// scenario stopped.
    Skipped,
    /// An unexpected failure of the automation itself rather than the test.
    Error,
}

/// Diagnostic payload attached to non-passing outcomes. Carries enough to
/// diagnose the failure without re-running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error classification, e.g. `Timeout` or `AssertionFailed`.
    pub error_kind: String,
    pub detail: String,
    /// Last known element state, when a locator was involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_state: Option<String>,
}

impl Diagnostic {
    pub fn new(error_kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error_kind: error_kind.into(),
            detail: detail.into(),
            element_state: None,
        }
    }

    pub fn with_element_state(mut self, state: impl Into<String>) -> Self {
        self.element_state = Some(state.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of attempts made, including the first.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    /// Cancelled externally; outcomes up to the last completed step are
    /// retained.
    Aborted,
}

/// The immutable outcome record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub session_id: String,
    pub scenario_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_row_index: Option<usize>,
    pub target: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Step outcomes in authored step order.
    pub outcomes: Vec<StepOutcome>,
}

impl RunResult {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                StepStatus::Passed => counts.passed += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Skipped => counts.skipped += 1,
                StepStatus::Error => counts.errors += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, other: &OutcomeCounts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}
