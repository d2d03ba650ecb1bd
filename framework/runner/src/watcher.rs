use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use autoflow_core::prelude::CancelListener;
use autoflow_model::prelude::{CompiledRule, ModelError, Variables, WatchSource};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::WatcherConfig;

/// Receives (scenario id, extracted variables) for every trigger match.
/// Emission is fire-and-forget: the watcher never blocks on scenario
/// execution.
pub type RunRequestSink = Box<dyn Fn(String, Variables) + Send>;

/// Durable read-cursor storage. Restarting a watcher resumes from the saved
/// offset so already-seen content is never reprocessed.
pub trait CursorStore: Send + Sync {
    fn load(&self, source: &Path) -> std::io::Result<Option<u64>>;
    fn save(&self, source: &Path, offset: u64) -> std::io::Result<()>;
}

/// One offset file per watched source, under a configurable directory.
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn cursor_path(&self, source: &Path) -> PathBuf {
        let mut name: String = source
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        name.push_str(".cursor");
        self.dir.join(name)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, source: &Path) -> std::io::Result<Option<u64>> {
        match std::fs::read_to_string(self.cursor_path(source)) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, source: &Path, offset: u64) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.cursor_path(source), offset.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    Running,
    /// Source I/O is failing; the watcher retries with backoff instead of
    /// crashing.
    Degraded,
    Stopped,
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("trigger watch I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tails one append-only log source on a background thread, applying the
/// source's trigger rules to each new line.
pub struct TriggerWatcher {
    handle: JoinHandle<()>,
    status: Arc<Mutex<WatcherStatus>>,
}

impl TriggerWatcher {
    /// Compile the source's rules and start the watch loop. The loop runs
    /// until `cancel` fires.
    pub fn start(
        config: WatcherConfig,
        source: WatchSource,
        store: Arc<dyn CursorStore>,
        sink: RunRequestSink,
        cancel: CancelListener,
    ) -> Result<Self, WatcherError> {
        let rules: Vec<CompiledRule> = source
            .rules
            .iter()
            .map(|rule| rule.compile())
            .collect::<Result<_, _>>()?;

        let status = Arc::new(Mutex::new(WatcherStatus::Running));
        let loop_status = status.clone();
        let handle = thread::Builder::new()
            .name(format!("watch-{}", source.path.display()))
            .spawn(move || {
                watch_loop(config, source.path, rules, store, sink, cancel, loop_status)
            })
            .expect("Failed to spawn watcher thread");

        Ok(Self { handle, status })
    }

    pub fn status(&self) -> WatcherStatus {
        *self.status.lock()
    }

    /// Wait for the watcher thread to exit after cancellation.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn watch_loop(
    config: WatcherConfig,
    path: PathBuf,
    rules: Vec<CompiledRule>,
    store: Arc<dyn CursorStore>,
    sink: RunRequestSink,
    mut cancel: CancelListener,
    status: Arc<Mutex<WatcherStatus>>,
) {
    log::info!("Watching '{}' with {} rules", path.display(), rules.len());

    let mut cursor = match store.load(&path) {
        Ok(offset) => offset.unwrap_or(0),
        Err(e) => {
            log::warn!(
                "Failed to load cursor for '{}': {e}; starting from the beginning",
                path.display()
            );
            0
        }
    };

    let mut debounce: HashMap<DebounceKey, Instant> = HashMap::new();
    let mut backoff = config.error_backoff_initial;

    while !cancel.is_cancelled() {
        match read_new_lines(&path, &mut cursor) {
            Ok(lines) => {
                *status.lock() = WatcherStatus::Running;
                backoff = config.error_backoff_initial;

                for line in &lines {
                    apply_rules(&rules, line, &mut debounce, config.debounce_window, &sink);
                }

                if !lines.is_empty() {
                    if let Err(e) = store.save(&path, cursor) {
                        log::warn!("Failed to persist cursor for '{}': {e}", path.display());
                        *status.lock() = WatcherStatus::Degraded;
                    }
                }
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                log::warn!(
                    "Trigger watch I/O error on '{}': {e}; backing off {:?}",
                    path.display(),
                    backoff
                );
                *status.lock() = WatcherStatus::Degraded;
                thread::sleep(backoff);
                backoff = (backoff * 2).min(config.error_backoff_max);
            }
        }
    }

    if let Err(e) = store.save(&path, cursor) {
        log::warn!("Failed to persist final cursor for '{}': {e}", path.display());
    }
    *status.lock() = WatcherStatus::Stopped;
    log::info!("Watcher for '{}' stopped", path.display());
}

type DebounceKey = (usize, Vec<(String, String)>);

/// Rules are applied in declaration order; the first match wins per line.
/// Identical (rule, extracted-variables) matches inside the debounce window
/// collapse to a single emission.
fn apply_rules(
    rules: &[CompiledRule],
    line: &str,
    debounce: &mut HashMap<DebounceKey, Instant>,
    window: Duration,
    sink: &RunRequestSink,
) {
    for (index, rule) in rules.iter().enumerate() {
        let Some(vars) = rule.match_line(line) else {
            continue;
        };

        let mut extracted: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        extracted.sort();
        let key = (index, extracted);

        let now = Instant::now();
        match debounce.get(&key) {
            Some(last) if now.duration_since(*last) < window => {
                log::debug!("Debounced duplicate trigger for scenario '{}'", rule.scenario);
            }
            _ => {
                debounce.insert(key, now);
                log::info!("Trigger matched, requesting scenario '{}'", rule.scenario);
                sink(rule.scenario.clone(), vars);
            }
        }
        return;
    }
}

/// Read complete lines added since `cursor`, advancing it past them. A
/// cursor beyond the current length means the source was truncated or
/// rotated: reset to the start and record the discontinuity instead of
/// failing.
fn read_new_lines(path: &Path, cursor: &mut u64) -> std::io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    if *cursor > len {
        log::warn!(
            "Source '{}' shrank below the saved cursor ({} > {len}); assuming rotation and restarting from offset 0",
            path.display(),
            *cursor
        );
        *cursor = 0;
    }

    if *cursor == len {
        return Ok(Vec::new());
    }

    file.seek(SeekFrom::Start(*cursor))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    // Only consume up to the last complete line; a partially written line
    // stays in place for the next poll.
    let consumed = match buffer.iter().rposition(|&b| b == b'\n') {
        Some(position) => position + 1,
        None => return Ok(Vec::new()),
    };

    let lines = String::from_utf8_lossy(&buffer[..consumed])
        .lines()
        .map(str::to_string)
        .collect();
    *cursor += consumed as u64;
    Ok(lines)
}
