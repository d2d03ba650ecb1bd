use std::fmt;
use std::time::Duration;

use autoflow_model::prelude::{ActionKind, Selector};
use thiserror::Error;

/// The application instance a session is bound to. No two concurrent
/// sessions share a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetScope {
    id: String,
}

impl TargetScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for TargetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Opaque handle to a located element.
///
/// Handles are only valid until the locator reports them stale; the runner
/// re-locates instead of operating on a dangling handle, and never assumes a
/// handle survives across a wait's polling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    token: String,
}

impl ElementHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Failures surfaced by the element locator. All four kinds are transient
/// and subject to the step's retry policy; what differs is how an exhausted
/// retry budget is classified in the run result (`NotFound`/`Timeout` read
/// as test failures, `Stale`/`ActionFailed` as automation errors).
#[derive(Debug, Clone, Error)]
pub enum LocatorError {
    #[error("element not found: {selector}")]
    NotFound { selector: String },

    #[error("element handle is stale")]
    Stale,

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl LocatorError {
    /// Error classification tag recorded in step diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            LocatorError::NotFound { .. } => "ElementNotFound",
            LocatorError::Stale => "ElementStale",
            LocatorError::ActionFailed(_) => "ActionError",
            LocatorError::Timeout(_) => "Timeout",
        }
    }
}

/// Capability contract the runner consumes for locating and manipulating UI
/// elements. Implemented outside the core by the host-specific automation
/// layer.
pub trait ElementLocator: Send + Sync {
    /// Resolve a selector to an element handle within the given target.
    fn locate(&self, selector: &Selector, scope: &TargetScope)
        -> Result<ElementHandle, LocatorError>;

    /// Perform a primitive action on a previously located element.
    fn act(&self, handle: &ElementHandle, action: &ActionKind) -> Result<(), LocatorError>;

    /// Read the element's current text. Used by asserts and `GetText`.
    fn read_text(&self, handle: &ElementHandle) -> Result<String, LocatorError>;

    /// Whether the bound application target is still alive. A dead target
    /// fails the session with `TargetLost`.
    fn target_alive(&self, scope: &TargetScope) -> bool;
}
