mod bind;
mod data;
mod error;
mod scenario;
mod selector;
mod step;
mod trigger;

pub mod prelude {
    pub use crate::bind::{resolve_placeholders, Variables};
    pub use crate::data::{DataRow, DataTable};
    pub use crate::error::ModelError;
    pub use crate::scenario::{ScenarioDefinition, ScenarioId, ScenarioLibrary};
    pub use crate::selector::Selector;
    pub use crate::step::{
        ActionKind, Backoff, LoopCount, Predicate, RetryPolicy, Step, StepId, StepKind,
        WaitCondition,
    };
    pub use crate::trigger::{CompiledRule, TriggerConfig, TriggerRule, WatchSource};
}
