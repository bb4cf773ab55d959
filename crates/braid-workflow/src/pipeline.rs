//! Sequential pipelines.
//!
//! Steps run in declaration order. Each step reads the run's [`Context`]
//! (through its predicate and transform) and appends exactly one
//! [`Outcome`]. A required step's failure stops the run; an optional step's
//! failure is recorded and the run continues.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use braid_capability::SharedCapability;
use braid_types::{
    Context, ErrorKind, Outcome, Topology, WorkflowDescriptor, WorkflowResult, WorkflowStatus,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DeclarationError, Result, check_unique_names};
use crate::invoke::invoke;
use crate::workflow::{Environment, Workflow, environment_setters};

/// Decides whether a step runs.
pub type Predicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Builds a step's input from the run so far.
pub type StepTransform = Arc<dyn Fn(&Context) -> Value + Send + Sync>;

/// One declared pipeline step.
#[derive(Clone)]
pub struct Step {
    name: String,
    capability: SharedCapability,
    optional: bool,
    predicate: Option<Predicate>,
    transform: Option<StepTransform>,
    cached: Option<bool>,
}

impl Step {
    pub fn new(name: impl Into<String>, capability: SharedCapability) -> Self {
        Self {
            name: name.into(),
            capability,
            optional: false,
            predicate: None,
            transform: None,
            cached: None,
        }
    }

    /// A failure of this step is recorded and the pipeline continues.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Only run this step when `predicate` holds for the context so far.
    pub fn when(mut self, predicate: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Compute this step's input from the context instead of taking the
    /// previous step's content.
    pub fn transform(
        mut self,
        transform: impl Fn(&Context) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Force caching on or off for this step.
    ///
    /// By default only deterministic capabilities are cached.
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    fn should_run(&self, ctx: &Context) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(ctx))
    }

    fn input(&self, ctx: &Context) -> Value {
        match &self.transform {
            Some(transform) => transform(ctx),
            None => ctx.last_content().clone(),
        }
    }

    fn failure(&self, cause: String) -> ErrorKind {
        if self.optional {
            ErrorKind::OptionalStepFailure {
                step: self.name.clone(),
                cause,
            }
        } else {
            ErrorKind::StepFailure {
                step: self.name.clone(),
                cause,
            }
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("capability", &self.capability.name())
            .field("optional", &self.optional)
            .field("conditional", &self.predicate.is_some())
            .finish()
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    steps: Vec<Step>,
    env: Environment,
}

impl PipelineBuilder {
    /// Append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    environment_setters!();

    /// Validate the declaration.
    pub fn build(self) -> Result<Pipeline> {
        if self.steps.is_empty() {
            return Err(DeclarationError::EmptyPipeline(self.name));
        }
        check_unique_names(&self.name, self.steps.iter().map(Step::name))?;
        self.env.config.validate()?;

        Ok(Pipeline {
            name: self.name,
            steps: self.steps,
            env: self.env,
        })
    }
}

/// A fixed, ordered list of steps.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    steps: Vec<Step>,
    env: Environment,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            steps: Vec::new(),
            env: Environment::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> WorkflowResult {
        let started = Instant::now();
        let guard = self.env.guard();
        let mut ctx = Context::new(input);
        let mut error = None;

        for step in &self.steps {
            if !step.should_run(&ctx) {
                debug!(workflow = %self.name, step = %step.name, "Step skipped");
                commit(&mut ctx, Outcome::skipped(&step.name));
                continue;
            }

            let cache = self.env.cache_for(step.cached, step.capability.as_ref());
            let outcome = match invoke(
                &guard,
                cache,
                step.capability.as_ref(),
                &step.name,
                step.input(&ctx),
                |cause| step.failure(cause),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(abort) => {
                    debug!(workflow = %self.name, step = %step.name, "Step not started");
                    error = Some(abort);
                    break;
                }
            };

            match &outcome.error {
                None => {
                    debug!(
                        workflow = %self.name,
                        step = %step.name,
                        cost = outcome.cost,
                        cache_hit = outcome.cache_hit,
                        "Step completed"
                    );
                    commit(&mut ctx, outcome);
                }
                Some(kind) if step.optional && !kind.is_cancelled() => {
                    warn!(workflow = %self.name, step = %step.name, error = %kind, "Optional step failed");
                    commit(&mut ctx, outcome);
                }
                Some(kind) => {
                    warn!(workflow = %self.name, step = %step.name, error = %kind, "Step failed");
                    // A step cancelled by an abort reports the abort's cause.
                    error = Some(match guard.aborted() {
                        Some(abort) if kind.is_cancelled() => abort,
                        _ => kind.clone(),
                    });
                    commit(&mut ctx, outcome);
                    break;
                }
            }
        }

        if error.is_none() {
            error = guard.aborted();
        }

        let content = ctx
            .outcomes()
            .iter()
            .rev()
            .find(|o| o.is_success())
            .map(|o| o.content.clone())
            .unwrap_or(Value::Null);

        let status = if error.is_some() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        let result = WorkflowResult::new(
            &self.name,
            status,
            ctx.into_outcomes(),
            BTreeMap::new(),
            content,
            started.elapsed(),
        );
        match error {
            Some(error) => result.with_error(error),
            None => result,
        }
    }
}

/// Commit an outcome to the run's context.
///
/// Names are unique per declaration and each step runs once, so the insert
/// cannot collide.
fn commit(ctx: &mut Context, outcome: Outcome) {
    if let Err(e) = ctx.insert(outcome) {
        warn!(error = %e, "Dropped duplicate step outcome");
    }
}

#[async_trait]
impl Workflow for Pipeline {
    fn descriptor(&self) -> WorkflowDescriptor {
        WorkflowDescriptor {
            name: self.name.clone(),
            version: self.env.config.version.clone(),
            topology: Topology::Pipeline,
            members: self.steps.iter().map(|s| s.name.clone()).collect(),
            timeout: self.env.config.timeout(),
            max_cost: self.env.config.max_cost,
        }
    }

    async fn call(&self, input: Value) -> WorkflowResult {
        let descriptor = self.descriptor();
        self.env.record(&descriptor, self.execute(input)).await
    }
}
