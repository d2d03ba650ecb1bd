mod dry_run;
mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autoflow_core::prelude::CancelHandle;
use autoflow_model::prelude::{ScenarioDefinition, ScenarioLibrary, TriggerConfig};
use autoflow_report::prelude::{ReportCollector, RunStatus};
use autoflow_runner::prelude::{
    FileCursorStore, RunRequest, Scheduler, SchedulerConfig, TargetScope, TriggerWatcher,
    WatcherConfig,
};
use clap::Parser;

use crate::dry_run::DryRunLocator;
use crate::progress::start_progress;

/// Run declarative UI automation scenarios from the command line.
#[derive(Parser)]
#[command(about, long_about = None)]
struct Cli {
    /// Scenario definition files (YAML). All of them are loaded into the
    /// library, so `Call` steps may reference any loaded scenario.
    #[clap(required = true)]
    scenarios: Vec<PathBuf>,

    /// Id of the scenario to run. Defaults to the first loaded file's id.
    #[clap(long)]
    run: Option<String>,

    /// Application target the sessions bind to.
    #[clap(long, default_value = "app-1")]
    target: String,

    /// Trigger configuration file; watched log sources emit additional run
    /// requests while sessions execute.
    #[clap(long)]
    triggers: Option<PathBuf>,

    /// Keep watching trigger sources until interrupted with Ctrl-C.
    #[clap(long, default_value = "false")]
    watch: bool,

    /// Maximum number of concurrently running sessions.
    #[clap(long, default_value = "4")]
    max_sessions: usize,

    /// Reject requests beyond capacity instead of queuing them.
    #[clap(long, default_value = "false")]
    no_queue: bool,

    /// Directory holding durable watcher read cursors.
    #[clap(long, default_value = ".autoflow/cursors")]
    cursor_dir: PathBuf,

    /// Write the report snapshot as JSON to this path.
    #[clap(long)]
    report_json: Option<PathBuf>,

    /// Do not show a progress bar on the CLI.
    ///
    /// Recommended for CI/CD environments where the bar just adds noise to
    /// the logs.
    #[clap(long, default_value = "false")]
    no_progress: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut library = ScenarioLibrary::new();
    let mut first_id = None;
    for path in &cli.scenarios {
        let definition = ScenarioDefinition::load(path)
            .with_context(|| format!("Failed to load scenario file {}", path.display()))?;
        first_id.get_or_insert(definition.id.clone());
        library.insert(definition)?;
    }

    let collector = Arc::new(ReportCollector::new());
    let scheduler = Scheduler::new(
        SchedulerConfig {
            max_sessions: cli.max_sessions,
            queue_requests: !cli.no_queue,
            ..SchedulerConfig::default()
        },
        Arc::new(library),
        Arc::new(DryRunLocator),
        collector.clone(),
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let cancel = start_cancel_listener(&runtime, scheduler.clone());
    // Subscribed before anything can fire so an early interrupt is not lost.
    let mut interrupt = cancel.new_listener();

    let mut watchers = Vec::new();
    if let Some(triggers_path) = &cli.triggers {
        let config = TriggerConfig::load(triggers_path)
            .with_context(|| format!("Failed to load trigger file {}", triggers_path.display()))?;
        let store = Arc::new(FileCursorStore::new(cli.cursor_dir.clone()));
        for source in config.sources {
            let sink_scheduler = scheduler.clone();
            let sink_target = TargetScope::new(cli.target.clone());
            let watcher = TriggerWatcher::start(
                WatcherConfig::default(),
                source,
                store.clone(),
                Box::new(move |scenario_id, variables| {
                    let request = RunRequest::new(scenario_id.clone(), sink_target.clone())
                        .with_variables(variables);
                    if let Err(e) = sink_scheduler.submit(request) {
                        log::warn!("Triggered run of '{scenario_id}' was not admitted: {e}");
                    }
                }),
                cancel.new_listener(),
            )?;
            watchers.push(watcher);
        }
    }

    // Without --run, trigger-only invocations just watch; otherwise the
    // first loaded scenario is the default.
    let initial_run = cli
        .run
        .clone()
        .or(if watchers.is_empty() { first_id } else { None });

    if let Some(scenario_id) = initial_run {
        // Subscribed before submitting so no finish event is missed.
        let progress_events = scheduler.subscribe();
        let request = RunRequest::new(scenario_id, TargetScope::new(cli.target.clone()));
        let session_ids = scheduler.submit(request)?;
        log::info!("Submitted {} session(s)", session_ids.len());

        if !cli.no_progress {
            start_progress(session_ids.len() as u64, progress_events);
        }
    }

    if cli.watch {
        // Watch mode runs until interrupted; triggered sessions come and go.
        runtime.block_on(interrupt.wait_cancelled());
    }

    scheduler.wait_idle();

    if !watchers.is_empty() {
        // Harmless if the interrupt handler already fired.
        cancel.cancel();
        for watcher in watchers {
            watcher.join();
        }
    }

    let snapshot = collector.snapshot();
    snapshot.print_summary();

    if let Some(path) = &cli.report_json {
        std::fs::write(path, snapshot.to_json()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    let not_completed = snapshot
        .results
        .iter()
        .filter(|result| result.status != RunStatus::Completed)
        .count();
    if not_completed > 0 {
        anyhow::bail!("{not_completed} scenario run(s) did not complete");
    }

    Ok(())
}

fn start_cancel_listener(runtime: &tokio::runtime::Runtime, scheduler: Scheduler) -> CancelHandle {
    let handle = CancelHandle::new();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to receive Ctrl-C signal");
        println!("Received interrupt, cancelling sessions...");
        listener_handle.cancel();
        scheduler.cancel_all();
    });

    handle
}
