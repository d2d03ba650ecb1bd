use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autoflow_core::prelude::CancelHandle;
use autoflow_model::prelude::{TriggerRule, Variables, WatchSource};
use autoflow_runner::prelude::{
    CursorStore, FileCursorStore, TriggerWatcher, WatcherConfig, WatcherStatus,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

type Emitted = Arc<Mutex<Vec<(String, Variables)>>>;

fn fast_watcher_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(10),
        debounce_window: Duration::from_millis(500),
        error_backoff_initial: Duration::from_millis(20),
        error_backoff_max: Duration::from_millis(100),
    }
}

fn user_rule() -> TriggerRule {
    TriggerRule {
        pattern: r"login user=(?P<name>\w+)".to_string(),
        scenario: "post-login".to_string(),
        bind: [("name".to_string(), "user".to_string())]
            .into_iter()
            .collect(),
    }
}

fn source_with(path: PathBuf, rules: Vec<TriggerRule>) -> WatchSource {
    WatchSource { path, rules }
}

/// Run a watcher over the source until it has had time to drain new
/// content, then stop it cleanly.
fn run_watcher_once(
    source: WatchSource,
    store: Arc<dyn CursorStore>,
    config: WatcherConfig,
) -> Vec<(String, Variables)> {
    let emitted: Emitted = Arc::new(Mutex::new(Vec::new()));
    let sink_emitted = emitted.clone();
    let cancel = CancelHandle::new();

    let watcher = TriggerWatcher::start(
        config,
        source,
        store,
        Box::new(move |scenario, vars| sink_emitted.lock().push((scenario, vars))),
        cancel.new_listener(),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(150));
    cancel.cancel();
    watcher.join();

    let collected = emitted.lock().clone();
    collected
}

#[test]
fn restart_with_persisted_cursor_does_not_reemit() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    std::fs::write(&log_path, "login user=ada\n").unwrap();

    let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().join("cursors")));

    let first = run_watcher_once(
        source_with(log_path.clone(), vec![user_rule()]),
        store.clone(),
        fast_watcher_config(),
    );
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].0, "post-login");
    assert_eq!(first[0].1["user"], "ada");

    // Same content, fresh watcher, same store: nothing new to see.
    let second = run_watcher_once(
        source_with(log_path.clone(), vec![user_rule()]),
        store.clone(),
        fast_watcher_config(),
    );
    assert!(second.is_empty(), "{second:?}");

    // New content after the cursor is picked up exactly once.
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&log_path)
        .unwrap();
    writeln!(file, "login user=grace").unwrap();
    drop(file);

    let third = run_watcher_once(
        source_with(log_path, vec![user_rule()]),
        store,
        fast_watcher_config(),
    );
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].1["user"], "grace");
}

#[test]
fn truncated_source_resets_to_the_start() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    std::fs::write(
        &log_path,
        "noise line one\nnoise line two\nlogin user=ada\n",
    )
    .unwrap();

    let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().join("cursors")));

    let first = run_watcher_once(
        source_with(log_path.clone(), vec![user_rule()]),
        store.clone(),
        fast_watcher_config(),
    );
    assert_eq!(first.len(), 1);

    // Rotation: the file is replaced with shorter content. The cursor now
    // points past the end and must reset rather than fail.
    std::fs::write(&log_path, "login user=grace\n").unwrap();

    let second = run_watcher_once(
        source_with(log_path, vec![user_rule()]),
        store,
        fast_watcher_config(),
    );
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].1["user"], "grace");
}

#[test]
fn identical_matches_inside_the_debounce_window_collapse() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    std::fs::write(
        &log_path,
        "login user=ada\nlogin user=ada\nlogin user=grace\nlogin user=ada\n",
    )
    .unwrap();

    let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().join("cursors")));
    let emitted = run_watcher_once(
        source_with(log_path, vec![user_rule()]),
        store,
        fast_watcher_config(),
    );

    // Three ada lines collapse to one; grace is a distinct variable set.
    let mut users: Vec<&str> = emitted.iter().map(|(_, vars)| vars["user"].as_str()).collect();
    users.sort();
    assert_eq!(users, ["ada", "grace"]);
}

#[test]
fn first_matching_rule_wins_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("app.log");
    std::fs::write(&log_path, "login user=ada\n").unwrap();

    let catch_all = TriggerRule {
        pattern: "login".to_string(),
        scenario: "generic-login".to_string(),
        bind: HashMap::new(),
    };

    let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().join("cursors")));
    let emitted = run_watcher_once(
        source_with(log_path, vec![user_rule(), catch_all]),
        store,
        fast_watcher_config(),
    );

    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, "post-login");
}

#[test]
fn missing_source_degrades_instead_of_crashing() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("absent.log");

    let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().join("cursors")));
    let cancel = CancelHandle::new();
    let watcher = TriggerWatcher::start(
        fast_watcher_config(),
        source_with(log_path.clone(), vec![user_rule()]),
        store,
        Box::new(|_, _| {}),
        cancel.new_listener(),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(watcher.status(), WatcherStatus::Degraded);

    // The source appearing later recovers the watcher.
    std::fs::write(&log_path, "noise\n").unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(watcher.status(), WatcherStatus::Running);

    cancel.cancel();
    watcher.join();
}
