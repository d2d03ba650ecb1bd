use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use autoflow_core::prelude::{CancelListener, PauseSwitch};
use autoflow_model::prelude::{
    resolve_placeholders, ActionKind, DataTable, LoopCount, ModelError, Predicate, RetryPolicy,
    ScenarioLibrary, Selector, Step, StepKind, WaitCondition,
};
use autoflow_report::prelude::{Diagnostic, RunResult, RunStatus, StepOutcome, StepStatus};
use chrono::{DateTime, Utc};

use crate::config::RunnerConfig;
use crate::context::ExecutionContext;
use crate::events::{EventBus, SessionEvent};
use crate::locator::{ElementLocator, LocatorError, TargetScope};

/// Observable state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Parked in a `Wait` step's poll loop.
    StepWait,
    Paused,
    Completed,
    Failed,
    Aborted,
}

/// How a step sequence ended.
///
/// `Stop` is an ordinary non-continuable failure and can be contained by a
/// `TryCatch`; `Fatal` (binding errors, recursion limit, lost target) always
/// aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
    Fatal,
    Abort,
}

enum PollEnd {
    TimedOut,
    Cancelled,
}

/// Interprets one scenario against one application target.
///
/// Side effects are confined to locator calls and appends to the run
/// result; all mutable run state lives in the [ExecutionContext] this
/// runner exclusively owns for the duration of the run.
pub struct ScenarioRunner {
    library: Arc<ScenarioLibrary>,
    locator: Arc<dyn ElementLocator>,
    config: RunnerConfig,
    target: TargetScope,
    session_id: String,
    cancel: CancelListener,
    pause: PauseSwitch,
    events: EventBus,
    data_table: Option<Arc<DataTable>>,
    state: SessionState,
    outcomes: Vec<StepOutcome>,
}

impl ScenarioRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        library: Arc<ScenarioLibrary>,
        locator: Arc<dyn ElementLocator>,
        config: RunnerConfig,
        target: TargetScope,
        session_id: impl Into<String>,
        cancel: CancelListener,
        pause: PauseSwitch,
        events: EventBus,
    ) -> Self {
        Self {
            library,
            locator,
            config,
            target,
            session_id: session_id.into(),
            cancel,
            pause,
            events,
            data_table: None,
            state: SessionState::Idle,
            outcomes: Vec::new(),
        }
    }

    /// Attach the data table backing `Loop` steps bound to data rows.
    pub fn with_data_table(mut self, table: Arc<DataTable>) -> Self {
        self.data_table = Some(table);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Execute the scenario to completion, producing the immutable run
    /// result. Deterministic given identical scenario, context and locator
    /// behaviour.
    pub fn run(mut self, scenario_id: &str, mut ctx: ExecutionContext) -> RunResult {
        let started_at = Utc::now();
        let started = Instant::now();

        self.events.publish(SessionEvent::SessionStarted {
            session_id: self.session_id.clone(),
            scenario_id: scenario_id.to_string(),
            target: self.target.id().to_string(),
        });
        self.set_state(SessionState::Running);

        let flow = match self.library.get(scenario_id) {
            Ok(scenario) => {
                log::info!(
                    "Session '{}' running scenario '{}' against target '{}'",
                    self.session_id,
                    scenario_id,
                    self.target
                );
                let scenario = scenario.clone();
                self.run_steps(&scenario.steps, &mut ctx)
            }
            Err(err) => {
                self.outcomes.push(StepOutcome {
                    step_id: scenario_id.to_string(),
                    description: format!("RUN '{scenario_id}'"),
                    status: StepStatus::Error,
                    started_at: Utc::now(),
                    duration_ms: 0,
                    attempts: 1,
                    diagnostic: Some(Diagnostic::new("ScenarioParseError", err.to_string())),
                });
                Flow::Fatal
            }
        };

        let status = match flow {
            Flow::Continue => {
                self.set_state(SessionState::Completed);
                RunStatus::Completed
            }
            Flow::Stop | Flow::Fatal => {
                self.set_state(SessionState::Failed);
                RunStatus::Failed
            }
            Flow::Abort => {
                self.set_state(SessionState::Aborted);
                RunStatus::Aborted
            }
        };

        let result = RunResult {
            session_id: self.session_id.clone(),
            scenario_id: scenario_id.to_string(),
            data_row_index: ctx.data_row_index(),
            target: self.target.id().to_string(),
            status,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            outcomes: self.outcomes,
        };

        self.events.publish(SessionEvent::SessionFinished {
            session_id: result.session_id.clone(),
            result: result.clone(),
        });

        result
    }

    fn run_steps(&mut self, steps: &[Step], ctx: &mut ExecutionContext) -> Flow {
        for (index, step) in steps.iter().enumerate() {
            match self.execute_step(step, ctx) {
                Flow::Continue => {}
                flow @ (Flow::Stop | Flow::Fatal) => {
                    self.skip_steps(&steps[index + 1..]);
                    return flow;
                }
                Flow::Abort => return Flow::Abort,
            }
        }
        Flow::Continue
    }

    /// Record the remaining steps of a stopped sequence as skipped so the
    /// run result still covers every authored step.
    fn skip_steps(&mut self, steps: &[Step]) {
        for step in steps {
            self.record(step, StepStatus::Skipped, Utc::now(), Duration::ZERO, 0, None);
        }
    }

    fn execute_step(&mut self, step: &Step, ctx: &mut ExecutionContext) -> Flow {
        if let Some(flow) = self.park_if_paused() {
            return flow;
        }

        if self.cancel.is_cancelled() {
            log::debug!(
                "Session '{}' cancelled before step '{}'",
                self.session_id,
                step.id
            );
            return Flow::Abort;
        }

        if !self.locator.target_alive(&self.target) {
            self.record(
                step,
                StepStatus::Error,
                Utc::now(),
                Duration::ZERO,
                1,
                Some(Diagnostic::new(
                    "TargetLost",
                    "target application is closed or not responding",
                )),
            );
            return Flow::Fatal;
        }

        let started_at = Utc::now();
        let started = Instant::now();

        match &step.kind {
            StepKind::Action { action, selector } => {
                self.run_action(step, action, selector, ctx, started_at, started)
            }
            StepKind::Wait {
                selector,
                condition,
                timeout_ms,
            } => self.run_wait(step, selector, *condition, *timeout_ms, ctx, started_at, started),
            StepKind::Assert { selector, expected } => {
                self.run_assert(step, selector, expected, ctx, started_at, started)
            }
            StepKind::Conditional {
                predicate,
                then_steps,
                else_steps,
            } => self.run_conditional(step, predicate, then_steps, else_steps, ctx, started_at, started),
            StepKind::Loop {
                count,
                counter_var,
                body,
            } => self.run_loop(step, *count, counter_var.as_deref(), body, ctx, started_at, started),
            StepKind::Call { scenario } => self.run_call(step, scenario, ctx, started_at, started),
            StepKind::TryCatch {
                try_steps,
                catch_steps,
            } => self.run_try_catch(step, try_steps, catch_steps, ctx, started_at, started),
        }
    }

    /// Park at the step boundary while the pause switch is engaged.
    /// Cancellation still takes effect while paused.
    fn park_if_paused(&mut self) -> Option<Flow> {
        if !self.pause.is_paused() {
            return None;
        }
        self.set_state(SessionState::Paused);
        while self.pause.is_paused() {
            if self.cancel.is_cancelled() {
                return Some(Flow::Abort);
            }
            thread::sleep(self.config.wait_poll_interval);
        }
        self.set_state(SessionState::Running);
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn run_action(
        &mut self,
        step: &Step,
        action: &ActionKind,
        selector: &Selector,
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        let (action, selector) = match self.resolve_action(action, selector, ctx) {
            Ok(resolved) => resolved,
            Err(err) => return self.fail_binding(step, err, started_at, started),
        };

        let policy = step.retry.unwrap_or(self.config.default_retry);
        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            let delay = policy.delay_before(attempts);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if attempts > 1 && self.cancel.is_cancelled() {
                return Flow::Abort;
            }

            match self.perform(&action, &selector, ctx) {
                Ok(()) => break Ok(()),
                Err(err) if attempts < policy.max_attempts => {
                    log::warn!(
                        "Step '{}' attempt {attempts}/{} failed: {err}",
                        step.id,
                        policy.max_attempts
                    );
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(()) => {
                self.record(step, StepStatus::Passed, started_at, started.elapsed(), attempts, None);
                Flow::Continue
            }
            Err(err) => self.fail_locator(step, err, started_at, started, attempts),
        }
    }

    fn perform(
        &self,
        action: &ActionKind,
        selector: &Selector,
        ctx: &mut ExecutionContext,
    ) -> Result<(), LocatorError> {
        let handle = self.locator.locate(selector, &self.target)?;
        if let ActionKind::GetText { store_as } = action {
            let text = self.locator.read_text(&handle)?;
            log::info!("Stored text '{text}' into variable '{store_as}'");
            ctx.set_var(store_as.clone(), text);
            return Ok(());
        }
        self.locator.act(&handle, action)
    }

    fn resolve_action(
        &self,
        action: &ActionKind,
        selector: &Selector,
        ctx: &ExecutionContext,
    ) -> Result<(ActionKind, Selector), ModelError> {
        let selector = selector.resolve(ctx.variables())?;
        let action = match action {
            ActionKind::SetText { text } => ActionKind::SetText {
                text: resolve_placeholders(text, ctx.variables())?,
            },
            ActionKind::Select { item } => ActionKind::Select {
                item: resolve_placeholders(item, ctx.variables())?,
            },
            other => other.clone(),
        };
        Ok((action, selector))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_wait(
        &mut self,
        step: &Step,
        selector: &Selector,
        condition: WaitCondition,
        timeout_ms: u64,
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        let selector = match selector.resolve(ctx.variables()) {
            Ok(selector) => selector,
            Err(err) => return self.fail_binding(step, err, started_at, started),
        };
        let timeout = Duration::from_millis(timeout_ms);
        // A wait is bounded by its own timeout; it only repeats when the
        // step carries an explicit retry policy.
        let policy = step.retry.unwrap_or_else(RetryPolicy::none);

        self.set_state(SessionState::StepWait);
        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match self.poll_condition(&selector, condition, timeout) {
                Ok(()) => break Ok(()),
                Err(PollEnd::Cancelled) => return Flow::Abort,
                Err(PollEnd::TimedOut) if attempts < policy.max_attempts => {
                    log::warn!(
                        "Step '{}' wait attempt {attempts}/{} timed out",
                        step.id,
                        policy.max_attempts
                    );
                }
                Err(PollEnd::TimedOut) => break Err(LocatorError::Timeout(timeout)),
            }
        };
        self.set_state(SessionState::Running);

        match result {
            Ok(()) => {
                self.record(step, StepStatus::Passed, started_at, started.elapsed(), attempts, None);
                Flow::Continue
            }
            Err(err) => self.fail_locator(step, err, started_at, started, attempts),
        }
    }

    fn poll_condition(
        &mut self,
        selector: &Selector,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<(), PollEnd> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PollEnd::Cancelled);
            }

            // Elements are not assumed stable across the polling interval:
            // every poll re-locates from scratch.
            let found = self.locator.locate(selector, &self.target).is_ok();
            let met = match condition {
                WaitCondition::ElementExists => found,
                WaitCondition::ElementVanishes => !found,
            };
            if met {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PollEnd::TimedOut);
            }
            thread::sleep(self.config.wait_poll_interval);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_assert(
        &mut self,
        step: &Step,
        selector: &Selector,
        expected: &str,
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        let (selector, expected) = match (
            selector.resolve(ctx.variables()),
            resolve_placeholders(expected, ctx.variables()),
        ) {
            (Ok(selector), Ok(expected)) => (selector, expected),
            (Err(err), _) | (_, Err(err)) => return self.fail_binding(step, err, started_at, started),
        };

        let policy = step.retry.unwrap_or(self.config.default_retry);
        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            let delay = policy.delay_before(attempts);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if attempts > 1 && self.cancel.is_cancelled() {
                return Flow::Abort;
            }

            match self.read_element_text(&selector) {
                Ok(actual) => break Ok(actual),
                Err(err) if attempts < policy.max_attempts => {
                    log::warn!(
                        "Step '{}' attempt {attempts}/{} failed: {err}",
                        step.id,
                        policy.max_attempts
                    );
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(actual) if actual == expected => {
                self.record(step, StepStatus::Passed, started_at, started.elapsed(), attempts, None);
                Flow::Continue
            }
            Ok(actual) => {
                let diagnostic = Diagnostic::new(
                    "AssertionFailed",
                    format!("expected \"{expected}\", got \"{actual}\""),
                )
                .with_element_state(actual);
                self.record(
                    step,
                    StepStatus::Failed,
                    started_at,
                    started.elapsed(),
                    attempts,
                    Some(diagnostic),
                );
                self.continue_or_stop(step)
            }
            Err(err) => self.fail_locator(step, err, started_at, started, attempts),
        }
    }

    fn read_element_text(&self, selector: &Selector) -> Result<String, LocatorError> {
        let handle = self.locator.locate(selector, &self.target)?;
        self.locator.read_text(&handle)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_conditional(
        &mut self,
        step: &Step,
        predicate: &Predicate,
        then_steps: &[Step],
        else_steps: &[Step],
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        let taken = match self.evaluate_predicate(predicate, ctx) {
            Ok(taken) => taken,
            Err(err) => return self.fail_binding(step, err, started_at, started),
        };

        let branch: &[Step] = if taken { then_steps } else { else_steps };
        if branch.is_empty() {
            // No branch to run: skip silently.
            self.record(step, StepStatus::Skipped, started_at, started.elapsed(), 1, None);
            return Flow::Continue;
        }
        log::debug!(
            "Step '{}' taking {} branch",
            step.id,
            if taken { "then" } else { "else" }
        );

        let flow = self.run_steps(branch, ctx);
        if flow == Flow::Continue {
            self.record(step, StepStatus::Passed, started_at, started.elapsed(), 1, None);
        }
        flow
    }

    fn evaluate_predicate(
        &self,
        predicate: &Predicate,
        ctx: &ExecutionContext,
    ) -> Result<bool, ModelError> {
        match predicate {
            Predicate::ElementExists { selector } => {
                let selector = selector.resolve(ctx.variables())?;
                let exists = self.locator.locate(&selector, &self.target).is_ok();
                log::debug!("Condition: element {selector} exists -> {exists}");
                Ok(exists)
            }
            Predicate::VariableEquals { name, value } => {
                let value = resolve_placeholders(value, ctx.variables())?;
                Ok(ctx.get_var(name) == Some(value.as_str()))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_loop(
        &mut self,
        step: &Step,
        count: LoopCount,
        counter_var: Option<&str>,
        body: &[Step],
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        let flow = match count {
            LoopCount::Fixed(n) => self.loop_fixed(n, counter_var, body, ctx),
            LoopCount::DataRows => {
                let Some(table) = self.data_table.clone() else {
                    self.record(
                        step,
                        StepStatus::Error,
                        started_at,
                        started.elapsed(),
                        1,
                        Some(Diagnostic::new(
                            "DataBindingError",
                            "loop is bound to data rows but the scenario has no data source",
                        )),
                    );
                    return Flow::Fatal;
                };
                self.loop_rows(&table, counter_var, body, ctx)
            }
        };

        if flow == Flow::Continue {
            self.record(step, StepStatus::Passed, started_at, started.elapsed(), 1, None);
        }
        flow
    }

    fn loop_fixed(
        &mut self,
        iterations: u32,
        counter_var: Option<&str>,
        body: &[Step],
        ctx: &mut ExecutionContext,
    ) -> Flow {
        let saved = counter_var.and_then(|name| ctx.get_var(name).map(str::to_string));
        let mut flow = Flow::Continue;
        for iteration in 1..=iterations {
            if let Some(name) = counter_var {
                ctx.set_var(name, iteration.to_string());
            }
            flow = self.run_steps(body, ctx);
            if flow != Flow::Continue {
                break;
            }
        }
        restore_var(ctx, counter_var, saved);
        flow
    }

    fn loop_rows(
        &mut self,
        table: &DataTable,
        counter_var: Option<&str>,
        body: &[Step],
        ctx: &mut ExecutionContext,
    ) -> Flow {
        let saved = counter_var.and_then(|name| ctx.get_var(name).map(str::to_string));
        let mut flow = Flow::Continue;
        for (index, row) in table.rows().iter().enumerate() {
            if let Some(name) = counter_var {
                ctx.set_var(name, (index + 1).to_string());
            }
            for (column, value) in row {
                ctx.set_var(column.clone(), value.clone());
            }
            flow = self.run_steps(body, ctx);
            if flow != Flow::Continue {
                break;
            }
        }
        restore_var(ctx, counter_var, saved);
        flow
    }

    fn run_call(
        &mut self,
        step: &Step,
        scenario_id: &str,
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        if ctx.call_depth() >= self.config.max_call_depth {
            self.record(
                step,
                StepStatus::Error,
                started_at,
                started.elapsed(),
                1,
                Some(Diagnostic::new(
                    "RecursionLimitExceeded",
                    format!(
                        "call depth limit of {} reached calling '{scenario_id}'",
                        self.config.max_call_depth
                    ),
                )),
            );
            return Flow::Fatal;
        }

        let callee = match self.library.get(scenario_id) {
            Ok(definition) => definition.clone(),
            Err(err) => {
                self.record(
                    step,
                    StepStatus::Error,
                    started_at,
                    started.elapsed(),
                    1,
                    Some(Diagnostic::new("ScenarioParseError", err.to_string())),
                );
                return Flow::Fatal;
            }
        };

        ctx.enter_call();
        let flow = self.run_steps(&callee.steps, ctx);
        ctx.exit_call();

        if flow == Flow::Continue {
            self.record(step, StepStatus::Passed, started_at, started.elapsed(), 1, None);
        }
        flow
    }

    #[allow(clippy::too_many_arguments)]
    fn run_try_catch(
        &mut self,
        step: &Step,
        try_steps: &[Step],
        catch_steps: &[Step],
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        log::debug!("Step '{}' entering try block", step.id);
        match self.run_steps(try_steps, ctx) {
            Flow::Continue => {
                self.skip_steps(catch_steps);
                self.record(step, StepStatus::Passed, started_at, started.elapsed(), 1, None);
                Flow::Continue
            }
            Flow::Stop => {
                log::warn!("Step '{}' contained a failure; running catch block", step.id);
                let flow = self.run_steps(catch_steps, ctx);
                if flow == Flow::Continue {
                    self.record(step, StepStatus::Passed, started_at, started.elapsed(), 1, None);
                }
                flow
            }
            flow @ (Flow::Fatal | Flow::Abort) => flow,
        }
    }

    /// Binding failures are parse-time-class errors: fatal, not retried, and
    /// not subject to continue-on-failure.
    fn fail_binding(
        &mut self,
        step: &Step,
        err: ModelError,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Flow {
        let kind = match &err {
            ModelError::DataBinding { .. } => "DataBindingError",
            _ => "ScenarioParseError",
        };
        self.record(
            step,
            StepStatus::Error,
            started_at,
            started.elapsed(),
            1,
            Some(Diagnostic::new(kind, err.to_string())),
        );
        Flow::Fatal
    }

    fn fail_locator(
        &mut self,
        step: &Step,
        err: LocatorError,
        started_at: DateTime<Utc>,
        started: Instant,
        attempts: u32,
    ) -> Flow {
        let status = match err {
            LocatorError::NotFound { .. } | LocatorError::Timeout(_) => StepStatus::Failed,
            LocatorError::Stale | LocatorError::ActionFailed(_) => StepStatus::Error,
        };
        let diagnostic = Diagnostic::new(err.kind(), err.to_string());
        self.record(step, status, started_at, started.elapsed(), attempts, Some(diagnostic));
        self.continue_or_stop(step)
    }

    fn continue_or_stop(&mut self, step: &Step) -> Flow {
        if step.continue_on_failure {
            log::warn!("Step '{}' failed but the scenario continues per policy", step.id);
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.events.publish(SessionEvent::StateChanged {
                session_id: self.session_id.clone(),
                state,
            });
        }
    }

    fn record(
        &mut self,
        step: &Step,
        status: StepStatus,
        started_at: DateTime<Utc>,
        duration: Duration,
        attempts: u32,
        diagnostic: Option<Diagnostic>,
    ) {
        let outcome = StepOutcome {
            step_id: step.id.clone(),
            description: step.describe(),
            status,
            started_at,
            duration_ms: duration.as_millis() as u64,
            attempts,
            diagnostic,
        };
        self.events.publish(SessionEvent::StepCompleted {
            session_id: self.session_id.clone(),
            step_id: outcome.step_id.clone(),
            description: outcome.description.clone(),
            status,
        });
        self.outcomes.push(outcome);
    }
}

fn restore_var(ctx: &mut ExecutionContext, name: Option<&str>, saved: Option<String>) {
    if let Some(name) = name {
        match saved {
            Some(value) => ctx.set_var(name, value),
            None => {
                ctx.remove_var(name);
            }
        }
    }
}
