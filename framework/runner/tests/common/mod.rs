#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autoflow_core::prelude::{CancelHandle, PauseSwitch};
use autoflow_model::prelude::{
    ActionKind, ScenarioDefinition, ScenarioLibrary, Selector, Step, StepKind,
};
use autoflow_runner::prelude::{
    ElementHandle, ElementLocator, EventBus, LocatorError, RunnerConfig, ScenarioRunner,
    TargetScope,
};
use parking_lot::Mutex;

/// Test double for the element locator, scripted per selector title.
/// Anything not mentioned by the script locates successfully.
#[derive(Default)]
pub struct ScriptedLocator {
    /// Titles that never locate.
    missing: Mutex<HashSet<String>>,
    /// Titles that fail to locate this many more times before succeeding.
    flaky: Mutex<HashMap<String, u32>>,
    /// Element text by title.
    texts: Mutex<HashMap<String, String>>,
    locate_counts: Mutex<HashMap<String, u32>>,
    act_log: Mutex<Vec<String>>,
    dead: AtomicBool,
}

impl ScriptedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(self, title: &str) -> Self {
        self.missing.lock().insert(title.to_string());
        self
    }

    pub fn flaky(self, title: &str, failures: u32) -> Self {
        self.flaky.lock().insert(title.to_string(), failures);
        self
    }

    pub fn with_text(self, title: &str, text: &str) -> Self {
        self.texts.lock().insert(title.to_string(), text.to_string());
        self
    }

    /// Make a title stop locating from now on, e.g. to simulate an element
    /// vanishing mid-run.
    pub fn make_missing(&self, title: &str) {
        self.missing.lock().insert(title.to_string());
    }

    pub fn kill_target(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn locate_count(&self, title: &str) -> u32 {
        self.locate_counts.lock().get(title).copied().unwrap_or(0)
    }

    pub fn actions(&self) -> Vec<String> {
        self.act_log.lock().clone()
    }
}

impl ElementLocator for ScriptedLocator {
    fn locate(
        &self,
        selector: &Selector,
        _scope: &TargetScope,
    ) -> Result<ElementHandle, LocatorError> {
        let title = selector.title.clone().unwrap_or_default();
        *self.locate_counts.lock().entry(title.clone()).or_insert(0) += 1;

        if self.missing.lock().contains(&title) {
            return Err(LocatorError::NotFound {
                selector: selector.to_string(),
            });
        }
        if let Some(remaining) = self.flaky.lock().get_mut(&title) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LocatorError::NotFound {
                    selector: selector.to_string(),
                });
            }
        }
        Ok(ElementHandle::new(title))
    }

    fn act(&self, handle: &ElementHandle, action: &ActionKind) -> Result<(), LocatorError> {
        self.act_log
            .lock()
            .push(format!("{}:{:?}", handle.token(), action));
        Ok(())
    }

    fn read_text(&self, handle: &ElementHandle) -> Result<String, LocatorError> {
        Ok(self
            .texts
            .lock()
            .get(handle.token())
            .cloned()
            .unwrap_or_default())
    }

    fn target_alive(&self, _scope: &TargetScope) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }
}

pub fn click(id: &str, title: &str) -> Step {
    Step::new(
        id,
        StepKind::Action {
            action: ActionKind::Click,
            selector: Selector::by_title(title),
        },
    )
}

pub fn set_text(id: &str, title: &str, text: &str) -> Step {
    Step::new(
        id,
        StepKind::Action {
            action: ActionKind::SetText {
                text: text.to_string(),
            },
            selector: Selector::by_title(title),
        },
    )
}

pub fn library_of(definitions: Vec<ScenarioDefinition>) -> Arc<ScenarioLibrary> {
    let mut library = ScenarioLibrary::new();
    for definition in definitions {
        library.insert(definition).unwrap();
    }
    Arc::new(library)
}

/// A runner wired with fresh cancellation and pause controls, bound to a
/// fixed test target.
pub fn build_runner(
    library: Arc<ScenarioLibrary>,
    locator: Arc<ScriptedLocator>,
    config: RunnerConfig,
) -> (ScenarioRunner, CancelHandle, PauseSwitch) {
    let cancel = CancelHandle::new();
    let pause = PauseSwitch::new();
    let runner = ScenarioRunner::new(
        library,
        locator,
        config,
        TargetScope::new("app-under-test"),
        "session-1",
        cancel.new_listener(),
        pause.clone(),
        EventBus::default(),
    );
    (runner, cancel, pause)
}

/// Runner config with short intervals and no implicit retries so tests stay
/// fast; steps that exercise retries carry an explicit policy.
pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        wait_poll_interval: std::time::Duration::from_millis(10),
        default_retry: autoflow_model::prelude::RetryPolicy::none(),
        ..RunnerConfig::default()
    }
}
