use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scenario::ScenarioId;
use crate::selector::Selector;

pub type StepId = String;

/// Primitive interaction performed against a located element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    /// Replace the element's text content.
    SetText { text: String },
    /// Read the element's text and store it as an execution context variable.
    GetText { store_as: String },
    /// Choose an item in a list or combo element.
    Select { item: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    ElementExists,
    ElementVanishes,
}

/// Predicate evaluated by a `Conditional` step against element state or the
/// execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    ElementExists { selector: Selector },
    VariableEquals { name: String, value: String },
}

/// Retry behaviour for transient step failures.
///
/// `max_attempts` counts the first try, so `max_attempts = 1` means no
/// retries at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff {
                initial_delay_ms: 250,
                multiplier: 2.0,
            },
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff {
                initial_delay_ms: 0,
                multiplier: 1.0,
            },
        }
    }

    /// Delay to sleep before attempt `attempt` (1-based). The first attempt
    /// never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.backoff.multiplier.powi(attempt as i32 - 2);
        Duration::from_millis((self.backoff.initial_delay_ms as f64 * factor) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopCount {
    /// Repeat the body a fixed number of times.
    Fixed(u32),
    /// Repeat the body once per row of the scenario's bound data source.
    DataRows,
}

/// One unit of scenario behaviour.
///
/// The set of variants is closed so the interpreter's dispatch stays
/// exhaustively checkable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Action {
        action: ActionKind,
        selector: Selector,
    },
    Wait {
        selector: Selector,
        condition: WaitCondition,
        timeout_ms: u64,
    },
    /// Compare the element's text against an expected value.
    Assert {
        selector: Selector,
        expected: String,
    },
    Conditional {
        predicate: Predicate,
        then_steps: Vec<Step>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        else_steps: Vec<Step>,
    },
    Loop {
        count: LoopCount,
        /// Variable holding the 1-based iteration number, visible to the body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counter_var: Option<String>,
        body: Vec<Step>,
    },
    /// Run another scenario from the library in the current context.
    Call { scenario: ScenarioId },
    /// Failures inside `try_steps` are contained: `catch_steps` run instead
    /// of aborting the session. When the try body succeeds the catch body is
    /// skipped.
    TryCatch {
        try_steps: Vec<Step>,
        catch_steps: Vec<Step>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub kind: StepKind,
    /// Per-step override of the runner's default retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// A failed outcome is recorded but does not abort the scenario.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_failure: bool,
}

impl Step {
    pub fn new(id: impl Into<StepId>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            retry: None,
            continue_on_failure: false,
        }
    }

    /// Child step sequences nested under this step, in authored order.
    pub fn child_sequences(&self) -> Vec<&[Step]> {
        match &self.kind {
            StepKind::Conditional {
                then_steps,
                else_steps,
                ..
            } => vec![then_steps.as_slice(), else_steps.as_slice()],
            StepKind::Loop { body, .. } => vec![body.as_slice()],
            StepKind::TryCatch {
                try_steps,
                catch_steps,
            } => vec![try_steps.as_slice(), catch_steps.as_slice()],
            _ => Vec::new(),
        }
    }

    /// Short human-readable description used in step outcomes and logs.
    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::Action { action, selector } => match action {
                ActionKind::Click => format!("CLICK {selector}"),
                ActionKind::DoubleClick => format!("DOUBLE CLICK {selector}"),
                ActionKind::SetText { text } => format!("SET TEXT on {selector} to \"{text}\""),
                ActionKind::GetText { store_as } => {
                    format!("GET TEXT from {selector} into [{store_as}]")
                }
                ActionKind::Select { item } => format!("SELECT \"{item}\" in {selector}"),
            },
            StepKind::Wait {
                selector,
                condition,
                timeout_ms,
            } => {
                let what = match condition {
                    WaitCondition::ElementExists => "appear",
                    WaitCondition::ElementVanishes => "vanish",
                };
                format!("WAIT for {selector} to {what} (timeout {timeout_ms}ms)")
            }
            StepKind::Assert { selector, expected } => {
                format!("ASSERT {selector} == \"{expected}\"")
            }
            StepKind::Conditional { predicate, .. } => match predicate {
                Predicate::ElementExists { selector } => format!("IF {selector} exists"),
                Predicate::VariableEquals { name, value } => {
                    format!("IF [{name}] == \"{value}\"")
                }
            },
            StepKind::Loop { count, .. } => match count {
                LoopCount::Fixed(n) => format!("LOOP x{n}"),
                LoopCount::DataRows => "LOOP over data rows".to_string(),
            },
            StepKind::Call { scenario } => format!("CALL '{scenario}'"),
            StepKind::TryCatch { .. } => "TRY/CATCH".to_string(),
        }
    }
}
