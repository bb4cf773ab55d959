//! Shared types for braid workflows.
//!
//! Every workflow topology produces the same shapes: one [`Outcome`] per
//! step, branch, or route, threaded through a per-run [`Context`], and a
//! single [`WorkflowResult`] at the end of the run.

pub mod context;
pub mod descriptor;
pub mod error;
pub mod outcome;
pub mod record;
pub mod result;

pub use context::Context;
pub use descriptor::{Topology, WorkflowDescriptor};
pub use error::{Error, ErrorKind, Result};
pub use outcome::{Outcome, TokenUsage};
pub use record::{ExecutionEvent, ExecutionRecord, RecordStatus};
pub use result::{WorkflowResult, WorkflowStatus};
