//! Workflow execution engine for braid.
//!
//! This crate composes [`Capability`](braid_capability::Capability) calls
//! into three fixed topologies, all returning the same
//! [`WorkflowResult`](braid_types::WorkflowResult):
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Pipeline   steps run in order, threading a Context     │
//! │  Parallel   branches fan out, join, then aggregate      │
//! │  Router     classify once, dispatch to one route        │
//! ├─────────────────────────────────────────────────────────┤
//! │  BudgetGuard   cost / wall-time ceiling for the run     │
//! │  CapabilityCache   fingerprint memo (braid-cache)       │
//! │  ExecutionSink     create/update execution records      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Workflows are declared once through builders and are immutable
//! afterwards. Failures during a run are data: callers inspect `status` and
//! `error` on the returned result.

pub mod budget;
pub mod config;
pub mod error;
mod invoke;
pub mod parallel;
pub mod pipeline;
pub mod router;
pub mod sink;
pub mod workflow;

pub use budget::{BudgetGuard, Metered, Spend};
pub use config::WorkflowConfig;
pub use error::{DeclarationError, Result};
pub use parallel::{AggregateFn, Branch, BranchTransform, Parallel, ParallelBuilder};
pub use pipeline::{Pipeline, PipelineBuilder, Predicate, Step, StepTransform};
pub use router::{CLASSIFY_STEP, Route, RouteTransform, Router, RouterBuilder};
pub use sink::{BroadcastSink, ExecutionSink, MemorySink, NoopSink, SharedSink};
pub use workflow::{SharedWorkflow, Workflow};
