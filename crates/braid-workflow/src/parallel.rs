//! Concurrent fan-out with a single aggregate.
//!
//! Every branch receives the run input (optionally transformed per branch)
//! and runs on its own task. Once all branches are terminal, the aggregate
//! hook turns the branch map into the run's content.
//!
//! Two failure policies:
//! - **fail-fast**: the first branch failure aborts the run; in-flight
//!   siblings are cancelled and report `Cancelled`, and branches that never
//!   started are omitted.
//! - **tolerant**: every branch runs to its own end; the run is `partial`
//!   when some (but not all) branches failed.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use braid_cache::CapabilityCache;
use braid_capability::SharedCapability;
use braid_types::{
    ErrorKind, Outcome, TokenUsage, Topology, WorkflowDescriptor, WorkflowResult, WorkflowStatus,
};
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::BudgetGuard;
use crate::error::{DeclarationError, Result, check_unique_names};
use crate::invoke::invoke;
use crate::workflow::{Environment, Workflow, environment_setters};

const BRANCH_PANICKED: &str = "branch task panicked";

/// Builds a branch's input from the run input.
pub type BranchTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Computes the run's content from the terminal branch map.
pub type AggregateFn = Arc<dyn Fn(&BTreeMap<String, Outcome>) -> Value + Send + Sync>;

/// One declared parallel branch.
#[derive(Clone)]
pub struct Branch {
    name: String,
    capability: SharedCapability,
    transform: Option<BranchTransform>,
    cached: Option<bool>,
}

impl Branch {
    pub fn new(name: impl Into<String>, capability: SharedCapability) -> Self {
        Self {
            name: name.into(),
            capability,
            transform: None,
            cached: None,
        }
    }

    /// Derive this branch's input from the run input.
    pub fn transform(mut self, transform: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Force caching on or off for this branch.
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn input(&self, input: &Value) -> Value {
        match &self.transform {
            Some(transform) => transform(input),
            None => input.clone(),
        }
    }

    fn failure(&self, cause: String) -> ErrorKind {
        ErrorKind::BranchFailure {
            branch: self.name.clone(),
            cause,
        }
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("capability", &self.capability.name())
            .finish()
    }
}

/// Builder for [`Parallel`].
pub struct ParallelBuilder {
    name: String,
    branches: Vec<Branch>,
    fail_fast: bool,
    aggregate: Option<AggregateFn>,
    max_concurrency: Option<usize>,
    env: Environment,
}

impl ParallelBuilder {
    /// Add a branch.
    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Cancel the remaining branches on the first failure (default: false).
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Compute the run's content from the branch map.
    ///
    /// Without one, the content is the branch map itself.
    pub fn aggregate(
        mut self,
        aggregate: impl Fn(&BTreeMap<String, Outcome>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.aggregate = Some(Arc::new(aggregate));
        self
    }

    /// Run at most `limit` branches at once.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    environment_setters!();

    /// Validate the declaration.
    pub fn build(self) -> Result<Parallel> {
        if self.branches.is_empty() {
            return Err(DeclarationError::NoBranches(self.name));
        }
        check_unique_names(&self.name, self.branches.iter().map(Branch::name))?;
        self.env.config.validate()?;

        Ok(Parallel {
            name: self.name,
            branches: self.branches,
            fail_fast: self.fail_fast,
            aggregate: self.aggregate,
            max_concurrency: self.max_concurrency,
            env: self.env,
        })
    }
}

impl std::fmt::Debug for ParallelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBuilder")
            .field("name", &self.name)
            .field("branches", &self.branches)
            .field("fail_fast", &self.fail_fast)
            .finish_non_exhaustive()
    }
}

/// A fixed set of independent branches run concurrently.
pub struct Parallel {
    name: String,
    branches: Vec<Branch>,
    fail_fast: bool,
    aggregate: Option<AggregateFn>,
    max_concurrency: Option<usize>,
    env: Environment,
}

impl Parallel {
    pub fn builder(name: impl Into<String>) -> ParallelBuilder {
        ParallelBuilder {
            name: name.into(),
            branches: Vec::new(),
            fail_fast: false,
            aggregate: None,
            max_concurrency: None,
            env: Environment::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    async fn execute(&self, input: Value) -> WorkflowResult {
        let started = Instant::now();
        let guard = Arc::new(self.env.guard());
        // Dropping the run (caller gave up) cancels every branch task.
        let _cancel_on_drop = guard.token().clone().drop_guard();
        let permits = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        let handles = self.branches.iter().map(|branch| {
            let task = BranchTask {
                workflow: self.name.clone(),
                input: branch.input(&input),
                cache: self
                    .env
                    .cache_for(branch.cached, branch.capability.as_ref())
                    .cloned(),
                branch: branch.clone(),
                guard: Arc::clone(&guard),
                permits: permits.clone(),
                fail_fast: self.fail_fast,
            };
            tokio::spawn(task.run())
        });
        let joined = join_all(handles).await;

        let mut branches = BTreeMap::new();
        for (branch, joined) in self.branches.iter().zip(joined) {
            let outcome = match joined {
                Ok(Some(outcome)) => outcome,
                Ok(None) if self.fail_fast => continue,
                // Tolerant runs keep one outcome per declared branch.
                Ok(None) => Outcome::cancelled(
                    &branch.name,
                    0.0,
                    TokenUsage::default(),
                    Duration::ZERO,
                ),
                Err(e) => {
                    warn!(workflow = %self.name, branch = %branch.name, error = %e, "Branch task panicked");
                    let error = branch.failure(BRANCH_PANICKED.to_string());
                    if self.fail_fast {
                        guard.abort(error.clone());
                    }
                    Outcome::failure(
                        &branch.name,
                        error,
                        0.0,
                        TokenUsage::default(),
                        Duration::ZERO,
                    )
                }
            };
            branches.insert(branch.name.clone(), outcome);
        }

        let (status, error) = self.settle(&guard, &branches);
        let content = match &self.aggregate {
            Some(aggregate) => aggregate(&branches),
            None => serde_json::to_value(&branches).unwrap_or(Value::Null),
        };

        let result = WorkflowResult::new(
            &self.name,
            status,
            Vec::new(),
            branches,
            content,
            started.elapsed(),
        );
        match error {
            Some(error) => result.with_error(error),
            None => result,
        }
    }

    /// Decide the run's status from the terminal branch map.
    fn settle(
        &self,
        guard: &BudgetGuard,
        branches: &BTreeMap<String, Outcome>,
    ) -> (WorkflowStatus, Option<ErrorKind>) {
        if let Some(error) = guard.aborted() {
            return (WorkflowStatus::Failed, Some(error));
        }

        let succeeded = branches.values().filter(|o| o.is_success()).count();
        if succeeded == branches.len() {
            return (WorkflowStatus::Completed, None);
        }
        if succeeded > 0 {
            return (WorkflowStatus::Partial, None);
        }

        let first_failure = self
            .branches
            .iter()
            .filter_map(|b| branches.get(&b.name))
            .find_map(|o| o.error.clone());
        (WorkflowStatus::Failed, first_failure)
    }
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("branches", &self.branches)
            .field("fail_fast", &self.fail_fast)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// Everything one branch task owns.
struct BranchTask {
    workflow: String,
    branch: Branch,
    input: Value,
    cache: Option<CapabilityCache>,
    guard: Arc<BudgetGuard>,
    permits: Option<Arc<Semaphore>>,
    fail_fast: bool,
}

impl BranchTask {
    /// Run the branch. `None` means it never started.
    async fn run(self) -> Option<Outcome> {
        let _permit = match &self.permits {
            Some(permits) => tokio::select! {
                permit = Arc::clone(permits).acquire_owned() => Some(permit.ok()?),
                _ = self.guard.token().cancelled() => return None,
            },
            None => None,
        };

        let branch = &self.branch;
        let started = Instant::now();
        let invoked = AssertUnwindSafe(invoke(
            &self.guard,
            self.cache.as_ref(),
            branch.capability.as_ref(),
            &branch.name,
            self.input,
            |cause| branch.failure(cause),
        ))
        .catch_unwind()
        .await;

        let outcome = match invoked {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                debug!(workflow = %self.workflow, branch = %branch.name, "Branch not started");
                return None;
            }
            Err(_) => {
                warn!(workflow = %self.workflow, branch = %branch.name, "Branch panicked");
                Outcome::failure(
                    &branch.name,
                    branch.failure(BRANCH_PANICKED.to_string()),
                    0.0,
                    TokenUsage::default(),
                    started.elapsed(),
                )
            }
        };

        match &outcome.error {
            None => {
                debug!(
                    workflow = %self.workflow,
                    branch = %branch.name,
                    cost = outcome.cost,
                    cache_hit = outcome.cache_hit,
                    "Branch completed"
                );
            }
            Some(kind) if kind.is_cancelled() => {
                debug!(
                    workflow = %self.workflow,
                    branch = %branch.name,
                    cost = outcome.cost,
                    "Branch cancelled"
                );
            }
            Some(kind) => {
                warn!(workflow = %self.workflow, branch = %branch.name, error = %kind, "Branch failed");
                if self.fail_fast && self.guard.aborted().is_none() {
                    info!(workflow = %self.workflow, branch = %branch.name, "Cancelling remaining branches");
                    self.guard.abort(kind.clone());
                }
            }
        }
        Some(outcome)
    }
}

#[async_trait]
impl Workflow for Parallel {
    fn descriptor(&self) -> WorkflowDescriptor {
        WorkflowDescriptor {
            name: self.name.clone(),
            version: self.env.config.version.clone(),
            topology: Topology::Parallel,
            members: self.branches.iter().map(|b| b.name.clone()).collect(),
            timeout: self.env.config.timeout(),
            max_cost: self.env.config.max_cost,
        }
    }

    async fn call(&self, input: Value) -> WorkflowResult {
        let descriptor = self.descriptor();
        self.env.record(&descriptor, self.execute(input)).await
    }
}
