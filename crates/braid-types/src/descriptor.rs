//! Declaration surface exposed for external tooling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The three fixed workflow shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Sequential steps.
    Pipeline,
    /// Concurrent fan-out followed by one aggregate.
    Parallel,
    /// Classify once, dispatch to exactly one route.
    Router,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Pipeline => write!(f, "pipeline"),
            Topology::Parallel => write!(f, "parallel"),
            Topology::Router => write!(f, "router"),
        }
    }
}

/// Introspectable description of a declared workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub name: String,
    pub version: String,
    pub topology: Topology,
    /// Step, branch, or route names in declaration order.
    pub members: Vec<String>,
    pub timeout: Option<Duration>,
    pub max_cost: Option<f64>,
}
