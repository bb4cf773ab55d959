//! Per-workflow configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeclarationError, Result};

/// Default version string for declared workflows.
pub const DEFAULT_VERSION: &str = "1";

/// Configuration for one declared workflow.
///
/// ```toml
/// [workflow]
/// version = "2"
/// timeout_ms = 30000
/// max_cost = 1.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Version reported in descriptors and execution records.
    pub version: String,

    /// Wall-clock budget for one run, in milliseconds.
    pub timeout_ms: Option<u64>,

    /// Cost ceiling for one run, in currency units.
    pub max_cost: Option<f64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            timeout_ms: None,
            max_cost: None,
        }
    }
}

impl WorkflowConfig {
    /// Create a new configuration with no budget.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Bound each run's wall time.
    ///
    /// Stored in whole milliseconds, rounded up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Bound each run's cumulative cost.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// The run timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(max_cost) = self.max_cost
            && !(max_cost >= 0.0)
        {
            return Err(DeclarationError::InvalidBudget(format!(
                "max_cost must be a non-negative number, got {max_cost}"
            )));
        }
        Ok(())
    }
}
