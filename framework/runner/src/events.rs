use autoflow_report::prelude::{RunResult, StepStatus};
use tokio::sync::broadcast;

use crate::interpreter::SessionState;

/// Progress events published while sessions execute. This is the control
/// surface the excluded presentation layer subscribes to; losing events
/// because a subscriber lags never blocks execution.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionStarted {
        session_id: String,
        scenario_id: String,
        target: String,
    },
    StateChanged {
        session_id: String,
        state: SessionState,
    },
    StepCompleted {
        session_id: String,
        step_id: String,
        description: String,
        status: StepStatus,
    },
    SessionFinished {
        session_id: String,
        result: RunResult,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // Send fails when nobody is subscribed, which is the common case for
        // headless runs.
        let _ = self.sender.send(event);
    }
}
