mod config;
mod context;
mod events;
mod interpreter;
mod locator;
mod scheduler;
mod watcher;

pub mod prelude {
    pub use crate::config::{RunnerConfig, SchedulerConfig, WatcherConfig};
    pub use crate::context::ExecutionContext;
    pub use crate::events::{EventBus, SessionEvent};
    pub use crate::interpreter::{ScenarioRunner, SessionState};
    pub use crate::locator::{ElementHandle, ElementLocator, LocatorError, TargetScope};
    pub use crate::scheduler::{Occupancy, RunRequest, Scheduler, SchedulerError};
    pub use crate::watcher::{
        CursorStore, FileCursorStore, RunRequestSink, TriggerWatcher, WatcherError, WatcherStatus,
    };
}
