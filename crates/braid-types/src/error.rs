//! Error types shared by all workflow topologies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the braid-types error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while manipulating run state.
#[derive(Debug, Error)]
pub enum Error {
    /// A step or branch name was written to the context twice.
    #[error("Duplicate context entry: {0}")]
    DuplicateEntry(String),
}

/// Why a step, branch, route, or whole run did not succeed.
///
/// These are data, not control flow: executors attach them to the relevant
/// [`Outcome`](crate::Outcome) and to the top-level
/// [`WorkflowResult`](crate::WorkflowResult) rather than returning `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required pipeline step failed and aborted the run.
    #[error("Step '{step}' failed: {cause}")]
    StepFailure { step: String, cause: String },

    /// An optional pipeline step failed; the run continued.
    #[error("Optional step '{step}' failed: {cause}")]
    OptionalStepFailure { step: String, cause: String },

    /// A parallel branch failed.
    #[error("Branch '{branch}' failed: {cause}")]
    BranchFailure { branch: String, cause: String },

    /// Terminated by fail-fast cancellation or budget exhaustion rather than
    /// by its own error.
    #[error("Cancelled")]
    Cancelled,

    /// The classifier returned a label with no matching route and no default.
    #[error("No route matches label '{label}'")]
    RouteNotFound { label: String },

    /// The run's wall-clock budget was exhausted.
    #[error("Timeout exceeded: {elapsed_ms}ms elapsed, limit {limit_ms}ms")]
    TimeoutExceeded { elapsed_ms: u64, limit_ms: u64 },

    /// The run's cost budget was exhausted.
    #[error("Budget exceeded: spent {spent:.4}, limit {limit:.4}")]
    BudgetExceeded { spent: f64, limit: f64 },

    /// Opaque failure from the underlying capability call.
    #[error("Capability '{capability}' failed: {cause}")]
    CapabilityError { capability: String, cause: String },
}

impl ErrorKind {
    /// Whether this error marks a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }
}
