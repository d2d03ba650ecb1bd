use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::collector::ReportSnapshot;

#[derive(Tabled)]
struct ScenarioRow {
    scenario_id: String,
    runs: usize,
    completed: usize,
    failed: usize,
    aborted: usize,
    steps_passed: usize,
    steps_failed: usize,
    steps_skipped: usize,
    step_errors: usize,
    #[tabled(display = "float2")]
    mean_duration_ms: f64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

pub(crate) fn print_scenario_summary(snapshot: &ReportSnapshot) {
    println!("\nSummary of scenario runs");
    let rows = snapshot
        .scenarios
        .iter()
        .map(|stats| ScenarioRow {
            scenario_id: stats.scenario_id.clone(),
            runs: stats.runs,
            completed: stats.completed,
            failed: stats.failed,
            aborted: stats.aborted,
            steps_passed: stats.steps.passed,
            steps_failed: stats.steps.failed,
            steps_skipped: stats.steps.skipped,
            step_errors: stats.steps.errors,
            mean_duration_ms: stats.mean_duration_ms,
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(&rows);
    table.with(Style::modern());

    println!("{table}");
}
