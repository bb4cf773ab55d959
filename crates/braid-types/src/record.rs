//! Execution records emitted for persistence and dashboards.
//!
//! The workflow engine only produces these; storing and broadcasting them is
//! the job of whoever implements the sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::{Topology, WorkflowDescriptor};
use crate::result::{WorkflowResult, WorkflowStatus};

/// Lifecycle state of a recorded execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl From<WorkflowStatus> for RecordStatus {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Completed => RecordStatus::Completed,
            WorkflowStatus::Failed => RecordStatus::Failed,
            WorkflowStatus::Partial => RecordStatus::Partial,
        }
    }
}

/// Snapshot of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow: String,
    pub version: String,
    pub topology: Topology,
    pub status: RecordStatus,
    /// Present once the run has finished.
    pub result: Option<WorkflowResult>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh record for a run that is just starting.
    pub fn started(descriptor: &WorkflowDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow: descriptor.name.clone(),
            version: descriptor.version.clone(),
            topology: descriptor.topology,
            status: RecordStatus::Running,
            result: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// The same record, finished with `result`.
    pub fn finished(&self, result: &WorkflowResult) -> Self {
        let now = Utc::now();
        Self {
            status: result.status.into(),
            result: Some(result.clone()),
            updated_at: now,
            finished_at: Some(now),
            ..self.clone()
        }
    }
}

/// Create/update events suitable for broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "record", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Created(ExecutionRecord),
    Updated(ExecutionRecord),
}

impl ExecutionEvent {
    pub fn record(&self) -> &ExecutionRecord {
        match self {
            ExecutionEvent::Created(record) | ExecutionEvent::Updated(record) => record,
        }
    }
}
