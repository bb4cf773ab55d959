//! Aggregate result of one workflow run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::outcome::{Outcome, TokenUsage};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Every step, branch, or route succeeded (optional failures allowed).
    Completed,
    /// The run aborted.
    Failed,
    /// Tolerant parallel run where some branches failed.
    Partial,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Partial => write!(f, "partial"),
        }
    }
}

/// The single result structure returned by every topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Name of the workflow that produced this result.
    pub workflow: String,
    pub status: WorkflowStatus,
    /// Pipeline steps (and router classify/route outcomes), declaration order.
    pub steps: Vec<Outcome>,
    /// Parallel branches keyed by branch name.
    pub branches: BTreeMap<String, Outcome>,
    /// Label of the route a router dispatched to.
    pub routed_to: Option<String>,
    /// Terminal or aggregated content.
    pub content: Value,
    /// Sum of `cost` over every outcome in this result.
    pub total_cost: f64,
    pub total_duration: Duration,
    /// Run-level error when the run did not complete.
    pub error: Option<ErrorKind>,
}

impl WorkflowResult {
    /// Assemble a result, deriving `total_cost` from the outcomes it holds.
    pub fn new(
        workflow: impl Into<String>,
        status: WorkflowStatus,
        steps: Vec<Outcome>,
        branches: BTreeMap<String, Outcome>,
        content: Value,
        total_duration: Duration,
    ) -> Self {
        let mut result = Self {
            workflow: workflow.into(),
            status,
            steps,
            branches,
            routed_to: None,
            content,
            total_cost: 0.0,
            total_duration,
            error: None,
        };
        result.total_cost = result.outcomes().map(|o| o.cost).sum();
        result
    }

    /// Attach the run-level error.
    pub fn with_error(mut self, error: ErrorKind) -> Self {
        self.error = Some(error);
        self
    }

    /// Record which route a router dispatched to.
    pub fn with_route(mut self, label: impl Into<String>) -> Self {
        self.routed_to = Some(label.into());
        self
    }

    /// Look up a step outcome by name.
    pub fn step(&self, name: &str) -> Option<&Outcome> {
        self.steps.iter().find(|o| o.name == name)
    }

    /// Look up a branch outcome by name.
    pub fn branch(&self, name: &str) -> Option<&Outcome> {
        self.branches.get(name)
    }

    /// Every outcome held by this result: steps first, then branches.
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.steps.iter().chain(self.branches.values())
    }

    /// Total tokens across all outcomes.
    pub fn total_tokens(&self) -> TokenUsage {
        self.outcomes()
            .fold(TokenUsage::default(), |acc, o| acc + o.tokens)
    }

    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
    }
}
