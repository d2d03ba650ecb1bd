mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autoflow_model::prelude::{ScenarioDefinition, Selector, Step, StepKind, WaitCondition};
use autoflow_report::prelude::{ReportCollector, RunStatus};
use autoflow_runner::prelude::{RunRequest, Scheduler, SchedulerConfig, SchedulerError, TargetScope};
use pretty_assertions::assert_eq;

use common::{click, library_of, set_text, ScriptedLocator};

fn fast_scheduler_config(max_sessions: usize, queue_requests: bool) -> SchedulerConfig {
    SchedulerConfig {
        max_sessions,
        queue_requests,
        runner: common::fast_config(),
    }
}

fn wait_step(id: &str, title: &str, timeout_ms: u64) -> Step {
    Step::new(
        id,
        StepKind::Wait {
            selector: Selector::by_title(title),
            condition: WaitCondition::ElementExists,
            timeout_ms,
        },
    )
}

#[test]
fn data_driven_scenario_produces_one_result_per_row() {
    let mut data_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(data_file, "user\nada\ngrace\nalan").unwrap();

    let mut scenario = ScenarioDefinition::new(
        "signup",
        vec![set_text("type-user", "Name", "{{ user }}")],
    );
    scenario.data_source = Some(data_file.path().to_path_buf());

    let library = library_of(vec![scenario]);
    let locator = Arc::new(ScriptedLocator::new());
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(2, true),
        library,
        locator.clone(),
        collector.clone(),
    );

    let session_ids = scheduler
        .submit(RunRequest::new("signup", TargetScope::new("app-1")))
        .unwrap();
    assert_eq!(session_ids.len(), 3);

    scheduler.wait_idle();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.results.len(), 3);

    let mut row_indexes: Vec<usize> = snapshot
        .results
        .iter()
        .map(|result| result.data_row_index.unwrap())
        .collect();
    row_indexes.sort();
    assert_eq!(row_indexes, [0, 1, 2]);
    assert!(snapshot
        .results
        .iter()
        .all(|result| result.status == RunStatus::Completed));

    // Each context held exactly its own row's values.
    let actions = locator.actions();
    assert_eq!(actions.len(), 3);
    for user in ["ada", "grace", "alan"] {
        assert_eq!(
            actions.iter().filter(|a| a.contains(user)).count(),
            1,
            "expected exactly one action for {user}: {actions:?}"
        );
    }
}

#[test]
fn capacity_exceeded_when_queuing_is_disabled() {
    let library = library_of(vec![ScenarioDefinition::new(
        "slow",
        vec![wait_step("linger", "Never", 500)],
    )]);
    let locator = Arc::new(ScriptedLocator::new().missing("Never"));
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(1, false),
        library,
        locator,
        collector,
    );

    scheduler
        .submit(RunRequest::new("slow", TargetScope::new("app-1")))
        .unwrap();

    let rejected = scheduler.submit(RunRequest::new("slow", TargetScope::new("app-2")));
    assert!(matches!(
        rejected,
        Err(SchedulerError::CapacityExceeded { .. })
    ));

    scheduler.wait_idle();
}

#[test]
fn occupancy_reports_running_and_queued() {
    let library = library_of(vec![ScenarioDefinition::new(
        "slow",
        vec![wait_step("linger", "Never", 400)],
    )]);
    let locator = Arc::new(ScriptedLocator::new().missing("Never"));
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(4, true),
        library,
        locator,
        collector,
    );

    // Same target group: the second and third queue behind the first.
    for _ in 0..3 {
        scheduler
            .submit(RunRequest::new("slow", TargetScope::new("app-1")))
            .unwrap();
    }

    let occupancy = scheduler.occupancy();
    assert_eq!(occupancy.running, 1);
    assert_eq!(occupancy.queued, 2);

    scheduler.wait_idle();
    assert_eq!(scheduler.occupancy(), Default::default());
}

#[test]
fn requests_for_one_target_run_in_arrival_order() {
    let library = library_of(vec![ScenarioDefinition::new(
        "tagged",
        vec![set_text("mark", "Log", "run {{ tag }}")],
    )]);
    let locator = Arc::new(ScriptedLocator::new());
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(4, true),
        library,
        locator.clone(),
        collector,
    );

    for tag in ["1", "2", "3"] {
        let variables = [("tag".to_string(), tag.to_string())].into_iter().collect();
        scheduler
            .submit(RunRequest::new("tagged", TargetScope::new("app-1")).with_variables(variables))
            .unwrap();
    }
    scheduler.wait_idle();

    let actions = locator.actions();
    assert_eq!(actions.len(), 3);
    assert!(actions[0].contains("run 1"), "{actions:?}");
    assert!(actions[1].contains("run 2"), "{actions:?}");
    assert!(actions[2].contains("run 3"), "{actions:?}");
}

#[test]
fn cancelling_a_session_aborts_it_within_one_step_bound() {
    let library = library_of(vec![ScenarioDefinition::new(
        "long-wait",
        vec![click("first", "A"), wait_step("linger", "Never", 5_000)],
    )]);
    let locator = Arc::new(ScriptedLocator::new().missing("Never"));
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(1, true),
        library,
        locator,
        collector.clone(),
    );

    let started = Instant::now();
    let session_ids = scheduler
        .submit(RunRequest::new("long-wait", TargetScope::new("app-1")))
        .unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(scheduler.cancel_session(&session_ids[0]));
    scheduler.wait_idle();

    assert!(started.elapsed() < Duration::from_secs(2));
    let snapshot = collector.snapshot();
    assert_eq!(snapshot.results.len(), 1);
    assert_eq!(snapshot.results[0].status, RunStatus::Aborted);
}

#[test]
fn cancelling_a_queued_session_records_an_aborted_result() {
    let library = library_of(vec![ScenarioDefinition::new(
        "slow",
        vec![wait_step("linger", "Never", 400)],
    )]);
    let locator = Arc::new(ScriptedLocator::new().missing("Never"));
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(1, true),
        library,
        locator,
        collector.clone(),
    );

    scheduler
        .submit(RunRequest::new("slow", TargetScope::new("app-1")))
        .unwrap();
    let queued_ids = scheduler
        .submit(RunRequest::new("slow", TargetScope::new("app-1")))
        .unwrap();

    assert!(scheduler.cancel_session(&queued_ids[0]));
    scheduler.wait_idle();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.results.len(), 2);
    let aborted = snapshot
        .results
        .iter()
        .find(|result| result.session_id == queued_ids[0])
        .unwrap();
    assert_eq!(aborted.status, RunStatus::Aborted);
    assert!(aborted.outcomes.is_empty());
}

/// Sessions on independent targets are fully isolated: a failure in one
/// leaves the other's result untouched, and neither observes the other's
/// variables.
#[test]
fn failure_in_one_session_leaves_others_unaffected() {
    let library = library_of(vec![
        ScenarioDefinition::new("ok", vec![set_text("mark", "Log", "from {{ who }}")]),
        ScenarioDefinition::new("broken", vec![click("boom", "Ghost")]),
    ]);
    let locator = Arc::new(ScriptedLocator::new().missing("Ghost"));
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(2, true),
        library,
        locator.clone(),
        collector.clone(),
    );

    let ok_vars = [("who".to_string(), "alpha".to_string())]
        .into_iter()
        .collect();
    scheduler
        .submit(RunRequest::new("ok", TargetScope::new("app-a")).with_variables(ok_vars))
        .unwrap();
    scheduler
        .submit(RunRequest::new("broken", TargetScope::new("app-b")))
        .unwrap();
    scheduler.wait_idle();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.results.len(), 2);

    let ok_result = snapshot
        .results
        .iter()
        .find(|result| result.scenario_id == "ok")
        .unwrap();
    let broken_result = snapshot
        .results
        .iter()
        .find(|result| result.scenario_id == "broken")
        .unwrap();

    assert_eq!(ok_result.status, RunStatus::Completed);
    assert_eq!(broken_result.status, RunStatus::Failed);
    // The healthy session resolved its own variable, not anything leaked
    // from the broken one.
    assert!(locator.actions()[0].contains("from alpha"));
}

#[test]
fn cancel_all_stops_running_and_queued_sessions() {
    let library = library_of(vec![ScenarioDefinition::new(
        "slow",
        vec![wait_step("linger", "Never", 5_000)],
    )]);
    let locator = Arc::new(ScriptedLocator::new().missing("Never"));
    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        fast_scheduler_config(1, true),
        library,
        locator,
        collector.clone(),
    );

    for target in ["app-1", "app-1", "app-2"] {
        scheduler
            .submit(RunRequest::new("slow", TargetScope::new(target)))
            .unwrap();
    }

    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    scheduler.cancel_all();
    scheduler.wait_idle();
    assert!(started.elapsed() < Duration::from_secs(2));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.results.len(), 3);
    assert!(snapshot
        .results
        .iter()
        .all(|result| result.status == RunStatus::Aborted));
}
