mod collector;
mod result;
mod summary_table;

pub mod prelude {
    pub use crate::collector::{ReportCollector, ReportSnapshot, ScenarioStats};
    pub use crate::result::{
        Diagnostic, OutcomeCounts, RunResult, RunStatus, StepOutcome, StepStatus,
    };
}
