use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::result::{OutcomeCounts, RunResult, RunStatus};
use crate::summary_table::print_scenario_summary;

/// Accumulates run results across sessions.
///
/// This is one of the two pieces of state shared between sessions (the other
/// is the scheduler's admission queue); concurrent writers serialize on the
/// internal mutex. Aggregation is pure: no retries, no side effects beyond
/// accumulation.
#[derive(Default)]
pub struct ReportCollector {
    results: Mutex<Vec<RunResult>>,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&self, result: RunResult) {
        log::debug!(
            "Collected result for scenario '{}' session '{}': {:?}",
            result.scenario_id,
            result.session_id,
            result.status
        );
        self.results.lock().push(result);
    }

    pub fn collected(&self) -> usize {
        self.results.lock().len()
    }

    /// Build an immutable snapshot of everything collected so far.
    pub fn snapshot(&self) -> ReportSnapshot {
        let results = self.results.lock().clone();

        let mut totals = OutcomeCounts::default();
        for result in &results {
            totals.add(&result.counts());
        }

        let scenarios = results
            .iter()
            .fold(HashMap::new(), |mut acc: HashMap<String, Vec<&RunResult>>, result| {
                acc.entry(result.scenario_id.clone()).or_default().push(result);
                acc
            })
            .into_iter()
            .map(|(scenario_id, runs)| {
                let mut steps = OutcomeCounts::default();
                for run in &runs {
                    steps.add(&run.counts());
                }
                let durations: Vec<u64> = runs.iter().map(|run| run.duration_ms).collect();
                let total_duration_ms: u64 = durations.iter().sum();

                ScenarioStats {
                    scenario_id,
                    runs: runs.len(),
                    completed: runs
                        .iter()
                        .filter(|run| run.status == RunStatus::Completed)
                        .count(),
                    failed: runs
                        .iter()
                        .filter(|run| run.status == RunStatus::Failed)
                        .count(),
                    aborted: runs
                        .iter()
                        .filter(|run| run.status == RunStatus::Aborted)
                        .count(),
                    steps,
                    total_duration_ms,
                    min_duration_ms: durations.iter().copied().min().unwrap_or(0),
                    max_duration_ms: durations.iter().copied().max().unwrap_or(0),
                    mean_duration_ms: if durations.is_empty() {
                        0.0
                    } else {
                        total_duration_ms as f64 / durations.len() as f64
                    },
                }
            })
            .sorted_by(|a, b| a.scenario_id.cmp(&b.scenario_id))
            .collect();

        ReportSnapshot {
            generated_at: Utc::now(),
            totals,
            scenarios,
            results,
        }
    }
}

/// Immutable aggregate view handed to an external renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Step outcome counts across every collected result.
    pub totals: OutcomeCounts,
    pub scenarios: Vec<ScenarioStats>,
    pub results: Vec<RunResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub scenario_id: String,
    pub runs: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub steps: OutcomeCounts,
    pub total_duration_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub mean_duration_ms: f64,
}

impl ReportSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print the per-scenario summary table to stdout.
    pub fn print_summary(&self) {
        print_scenario_summary(self);
    }
}
