use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use autoflow_core::prelude::{CancelHandle, CancelListener, PauseSwitch};
use autoflow_model::prelude::{DataTable, ModelError, ScenarioLibrary, Variables};
use autoflow_report::prelude::{ReportCollector, RunResult, RunStatus};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::SchedulerConfig;
use crate::context::ExecutionContext;
use crate::events::{EventBus, SessionEvent};
use crate::interpreter::ScenarioRunner;
use crate::locator::{ElementLocator, TargetScope};

/// A request to execute one scenario against one target. Manual, scheduled
/// and trigger-emitted requests all take this shape.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scenario_id: String,
    pub target: TargetScope,
    /// Extra variables seeded into the execution context, e.g. trigger
    /// captures. They win over data row values on name collisions.
    pub variables: Variables,
}

impl RunRequest {
    pub fn new(scenario_id: impl Into<String>, target: TargetScope) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            target,
            variables: Variables::new(),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Admission refused: the pool is full and queuing is disabled.
    #[error("scheduler capacity exceeded ({running} running, {queued} queued)")]
    CapacityExceeded { running: usize, queued: usize },

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    pub running: usize,
    pub queued: usize,
}

/// One admitted unit of work, waiting or running. The cancel handle and
/// pause switch are created at admission so queued sessions can be
/// cancelled before they start.
struct Job {
    arrival: u64,
    session_id: String,
    scenario_id: String,
    target: TargetScope,
    variables: Variables,
    data_row_index: Option<usize>,
    data_table: Option<Arc<DataTable>>,
    cancel: CancelHandle,
    /// Subscribed at admission so a cancel between dispatch and the session
    /// thread starting is not lost.
    cancel_listener: CancelListener,
    pause: PauseSwitch,
}

struct RunningSession {
    target: String,
    cancel: CancelHandle,
    pause: PauseSwitch,
}

#[derive(Default)]
struct SchedState {
    /// Pending jobs, FIFO per target group.
    queues: HashMap<String, VecDeque<Job>>,
    /// Live sessions keyed by session id.
    running: HashMap<String, RunningSession>,
    queued: usize,
    next_arrival: u64,
}

impl SchedState {
    fn enqueue(&mut self, mut job: Job) {
        job.arrival = self.next_arrival;
        self.next_arrival += 1;
        self.queued += 1;
        self.queues
            .entry(job.target.id().to_string())
            .or_default()
            .push_back(job);
    }

    /// Oldest queued job whose target has no live session. Within a target
    /// group, arrival order is preserved; no two sessions ever share a
    /// target.
    fn pop_runnable(&mut self) -> Option<Job> {
        let key = {
            let busy: HashSet<&str> = self.running.values().map(|s| s.target.as_str()).collect();
            self.queues
                .iter()
                .filter(|(target, queue)| !queue.is_empty() && !busy.contains(target.as_str()))
                .min_by_key(|(_, queue)| queue.front().map(|job| job.arrival).unwrap_or(u64::MAX))
                .map(|(target, _)| target.clone())?
        };
        let queue = self.queues.get_mut(&key)?;
        let job = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        self.queued -= 1;
        Some(job)
    }

    fn remove_queued(&mut self, session_id: &str) -> Option<Job> {
        for queue in self.queues.values_mut() {
            if let Some(position) = queue.iter().position(|job| job.session_id == session_id) {
                self.queued -= 1;
                return queue.remove(position);
            }
        }
        None
    }

    fn drain_queued(&mut self) -> Vec<Job> {
        self.queued = 0;
        self.queues
            .drain()
            .flat_map(|(_, queue)| queue.into_iter())
            .collect()
    }

    fn is_idle(&self) -> bool {
        self.running.is_empty() && self.queued == 0
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    library: Arc<ScenarioLibrary>,
    locator: Arc<dyn ElementLocator>,
    collector: Arc<ReportCollector>,
    events: EventBus,
    state: Mutex<SchedState>,
    idle: Condvar,
}

/// Maps run requests onto a bounded pool of concurrent sessions, each an
/// isolated (runner, execution context, target binding) triple.
///
/// The admission queue is one of the two pieces of state shared across
/// sessions; everything else a session touches is exclusively its own.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        library: Arc<ScenarioLibrary>,
        locator: Arc<dyn ElementLocator>,
        collector: Arc<ReportCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                library,
                locator,
                collector,
                events: EventBus::default(),
                state: Mutex::new(SchedState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Subscribe to session lifecycle and per-step progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Admit a run request, expanding a data-driven scenario into one
    /// session per data row. Returns the allocated session ids in row
    /// order.
    pub fn submit(&self, request: RunRequest) -> Result<Vec<String>, SchedulerError> {
        let scenario = self.inner.library.get(&request.scenario_id)?.clone();

        let mut jobs = Vec::new();
        if let Some(path) = &scenario.data_source {
            let table = Arc::new(DataTable::load(path)?);
            if table.is_empty() {
                log::warn!(
                    "Scenario '{}' data source '{}' has no rows; nothing to run",
                    request.scenario_id,
                    path.display()
                );
            }
            for index in 0..table.len() {
                jobs.push(make_job(&request, Some(index), Some(table.clone())));
            }
        } else {
            jobs.push(make_job(&request, None, None));
        }

        let session_ids: Vec<String> = jobs.iter().map(|job| job.session_id.clone()).collect();

        {
            let mut st = self.inner.state.lock();
            if !self.inner.config.queue_requests {
                let in_flight = st.running.len() + st.queued;
                if in_flight + jobs.len() > self.inner.config.max_sessions {
                    return Err(SchedulerError::CapacityExceeded {
                        running: st.running.len(),
                        queued: st.queued,
                    });
                }
            }
            for job in jobs {
                st.enqueue(job);
            }
        }

        self.dispatch();
        Ok(session_ids)
    }

    pub fn occupancy(&self) -> Occupancy {
        let st = self.inner.state.lock();
        Occupancy {
            running: st.running.len(),
            queued: st.queued,
        }
    }

    /// Cooperatively cancel one session. A queued session is withdrawn and
    /// recorded as aborted without starting; a running session stops at its
    /// next step boundary. Returns false if the session id is unknown.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        let queued_job = {
            let mut st = self.inner.state.lock();
            if let Some(session) = st.running.get(session_id) {
                session.cancel.cancel();
                return true;
            }
            let job = st.remove_queued(session_id);
            if st.is_idle() {
                self.inner.idle.notify_all();
            }
            job
        };

        match queued_job {
            Some(job) => {
                self.finish_without_running(job);
                true
            }
            None => false,
        }
    }

    /// Cancel every queued and running session.
    pub fn cancel_all(&self) {
        let (cancel_handles, withdrawn) = {
            let mut st = self.inner.state.lock();
            let handles: Vec<CancelHandle> =
                st.running.values().map(|s| s.cancel.clone()).collect();
            let withdrawn = st.drain_queued();
            if st.is_idle() {
                self.inner.idle.notify_all();
            }
            (handles, withdrawn)
        };

        for handle in cancel_handles {
            handle.cancel();
        }
        for job in withdrawn {
            self.finish_without_running(job);
        }
    }

    pub fn pause_session(&self, session_id: &str) -> bool {
        let st = self.inner.state.lock();
        match st.running.get(session_id) {
            Some(session) => {
                session.pause.pause();
                true
            }
            None => false,
        }
    }

    pub fn resume_session(&self, session_id: &str) -> bool {
        let st = self.inner.state.lock();
        match st.running.get(session_id) {
            Some(session) => {
                session.pause.resume();
                true
            }
            None => false,
        }
    }

    pub fn pause_all(&self) {
        let st = self.inner.state.lock();
        for session in st.running.values() {
            session.pause.pause();
        }
    }

    pub fn resume_all(&self) {
        let st = self.inner.state.lock();
        for session in st.running.values() {
            session.pause.resume();
        }
    }

    /// Block until no session is queued or running.
    pub fn wait_idle(&self) {
        let mut st = self.inner.state.lock();
        while !st.is_idle() {
            self.inner.idle.wait(&mut st);
        }
    }

    /// Start sessions while free slots and runnable jobs remain.
    fn dispatch(&self) {
        loop {
            let job = {
                let mut st = self.inner.state.lock();
                if st.running.len() >= self.inner.config.max_sessions {
                    return;
                }
                let Some(job) = st.pop_runnable() else {
                    return;
                };
                st.running.insert(
                    job.session_id.clone(),
                    RunningSession {
                        target: job.target.id().to_string(),
                        cancel: job.cancel.clone(),
                        pause: job.pause.clone(),
                    },
                );
                job
            };
            self.spawn_session(job);
        }
    }

    fn spawn_session(&self, job: Job) {
        let scheduler = self.clone();
        thread::Builder::new()
            .name(format!("session-{}", job.session_id))
            .spawn(move || scheduler.run_session(job))
            .expect("Failed to spawn session thread");
    }

    fn run_session(&self, job: Job) {
        let mut runner = ScenarioRunner::new(
            self.inner.library.clone(),
            self.inner.locator.clone(),
            self.inner.config.runner.clone(),
            job.target.clone(),
            job.session_id.clone(),
            job.cancel_listener.clone(),
            job.pause.clone(),
            self.inner.events.clone(),
        );
        if let Some(table) = &job.data_table {
            runner = runner.with_data_table(table.clone());
        }

        let ctx = match (&job.data_table, job.data_row_index) {
            (Some(table), Some(index)) => {
                ExecutionContext::for_data_row(index, &table.rows()[index], &job.variables)
            }
            _ => ExecutionContext::with_variables(job.variables.clone()),
        };

        let scenario_id = job.scenario_id.clone();
        let result = match catch_unwind(AssertUnwindSafe(|| runner.run(&scenario_id, ctx))) {
            Ok(result) => result,
            Err(_) => {
                // A panicking session must not take down the scheduler or
                // disturb its siblings; record the wreck and move on.
                log::error!(
                    "Session '{}' panicked while running scenario '{scenario_id}'",
                    job.session_id
                );
                RunResult {
                    session_id: job.session_id.clone(),
                    scenario_id: scenario_id.clone(),
                    data_row_index: job.data_row_index,
                    target: job.target.id().to_string(),
                    status: RunStatus::Failed,
                    started_at: Utc::now(),
                    duration_ms: 0,
                    outcomes: Vec::new(),
                }
            }
        };

        self.inner.collector.collect(result);

        {
            let mut st = self.inner.state.lock();
            st.running.remove(&job.session_id);
            if st.is_idle() {
                self.inner.idle.notify_all();
            }
        }
        self.dispatch();
    }

    /// Record a withdrawn queued job as aborted without executing anything.
    fn finish_without_running(&self, job: Job) {
        let result = RunResult {
            session_id: job.session_id.clone(),
            scenario_id: job.scenario_id.clone(),
            data_row_index: job.data_row_index,
            target: job.target.id().to_string(),
            status: RunStatus::Aborted,
            started_at: Utc::now(),
            duration_ms: 0,
            outcomes: Vec::new(),
        };
        self.inner.events.publish(SessionEvent::SessionFinished {
            session_id: job.session_id,
            result: result.clone(),
        });
        self.inner.collector.collect(result);
    }
}

fn make_job(
    request: &RunRequest,
    data_row_index: Option<usize>,
    data_table: Option<Arc<DataTable>>,
) -> Job {
    let cancel = CancelHandle::new();
    let cancel_listener = cancel.new_listener();
    Job {
        arrival: 0,
        session_id: nanoid::nanoid!(10),
        scenario_id: request.scenario_id.clone(),
        target: request.target.clone(),
        variables: request.variables.clone(),
        data_row_index,
        data_table,
        cancel,
        cancel_listener,
        pause: PauseSwitch::new(),
    }
}
