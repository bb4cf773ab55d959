//! Classifier-driven routing.
//!
//! A router asks its classifier for one label, picks the matching route (or
//! the default), and invokes that route's capability exactly once. Routes
//! that were not picked are never invoked.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use braid_capability::{RouteDescription, SharedCapability};
use braid_types::{
    ErrorKind, Outcome, Topology, WorkflowDescriptor, WorkflowResult, WorkflowStatus,
};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::BudgetGuard;
use crate::error::{DeclarationError, Result, check_unique_names};
use crate::invoke::invoke;
use crate::workflow::{Environment, Workflow, environment_setters};

/// Name of the outcome recording the classifier's decision.
pub const CLASSIFY_STEP: &str = "classify";

/// Rewrites the router input for the chosen route.
pub type RouteTransform = Arc<dyn Fn(&Value, &str) -> Value + Send + Sync>;

/// One declared route.
#[derive(Clone)]
pub struct Route {
    label: String,
    capability: SharedCapability,
    description: Option<String>,
    cached: Option<bool>,
}

impl Route {
    pub fn new(label: impl Into<String>, capability: SharedCapability) -> Self {
        Self {
            label: label.into(),
            capability,
            description: None,
            cached: None,
        }
    }

    /// Describe this route to the classifier.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Force caching on or off for this route.
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn describe(&self) -> RouteDescription {
        RouteDescription::new(self.label.clone(), self.description.clone())
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("label", &self.label)
            .field("capability", &self.capability.name())
            .field("description", &self.description)
            .finish()
    }
}

/// Builder for [`Router`].
pub struct RouterBuilder {
    name: String,
    classifier: Option<SharedCapability>,
    routes: Vec<Route>,
    default_route: Option<String>,
    before_route: Option<RouteTransform>,
    env: Environment,
}

impl RouterBuilder {
    /// The capability whose `classify` picks the route.
    pub fn classifier(mut self, classifier: SharedCapability) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Add a route. Routes are offered to the classifier in declaration order.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Route taken when the classifier returns an undeclared label.
    pub fn default_route(mut self, label: impl Into<String>) -> Self {
        self.default_route = Some(label.into());
        self
    }

    /// Rewrite the input once the route is known.
    pub fn before_route(
        mut self,
        transform: impl Fn(&Value, &str) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.before_route = Some(Arc::new(transform));
        self
    }

    environment_setters!();

    /// Validate the declaration.
    pub fn build(self) -> Result<Router> {
        if self.routes.is_empty() {
            return Err(DeclarationError::NoRoutes(self.name));
        }
        let Some(classifier) = self.classifier else {
            return Err(DeclarationError::MissingClassifier(self.name));
        };
        check_unique_names(&self.name, self.routes.iter().map(Route::label))?;
        if self.routes.iter().any(|r| r.label == CLASSIFY_STEP) {
            return Err(DeclarationError::ReservedName {
                workflow: self.name,
                name: CLASSIFY_STEP.to_string(),
            });
        }
        if let Some(label) = &self.default_route
            && !self.routes.iter().any(|r| &r.label == label)
        {
            return Err(DeclarationError::UnknownDefaultRoute {
                workflow: self.name,
                label: label.clone(),
            });
        }
        self.env.config.validate()?;

        Ok(Router {
            name: self.name,
            classifier,
            routes: self.routes,
            default_route: self.default_route,
            before_route: self.before_route,
            env: self.env,
        })
    }
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("name", &self.name)
            .field("routes", &self.routes)
            .field("default_route", &self.default_route)
            .finish_non_exhaustive()
    }
}

/// Classify once, dispatch to exactly one route.
pub struct Router {
    name: String,
    classifier: SharedCapability,
    routes: Vec<Route>,
    default_route: Option<String>,
    before_route: Option<RouteTransform>,
    env: Environment,
}

impl Router {
    pub fn builder(name: impl Into<String>) -> RouterBuilder {
        RouterBuilder {
            name: name.into(),
            classifier: None,
            routes: Vec::new(),
            default_route: None,
            before_route: None,
            env: Environment::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a classifier label to a declared route.
    ///
    /// Surrounding whitespace is ignored; matching is otherwise exact.
    fn select(&self, label: &str) -> Option<&Route> {
        let label = label.trim();
        self.routes
            .iter()
            .find(|r| r.label == label)
            .or_else(|| {
                let default = self.default_route.as_deref()?;
                self.routes.iter().find(|r| r.label == default)
            })
    }

    async fn execute(&self, input: Value) -> WorkflowResult {
        let started = Instant::now();
        let guard = self.env.guard();
        let mut run = RouterRun::new(&self.name, started);

        let label = match self.classify(&guard, &input).await {
            Ok((outcome, label)) => {
                run.steps.push(outcome);
                label
            }
            Err((outcome, error)) => {
                run.steps.extend(outcome);
                return run.fail(error);
            }
        };

        let Some(route) = self.select(&label) else {
            warn!(workflow = %self.name, label = %label, "No route matches classifier label");
            return run.fail(ErrorKind::RouteNotFound { label });
        };
        info!(
            workflow = %self.name,
            label = %label,
            route = %route.label,
            "Route selected"
        );
        run.routed_to = Some(route.label.clone());

        let route_input = match &self.before_route {
            Some(transform) => transform(&input, &route.label),
            None => input,
        };
        let cache = self.env.cache_for(route.cached, route.capability.as_ref());
        let capability = route.capability.name().to_string();
        let outcome = match invoke(
            &guard,
            cache,
            route.capability.as_ref(),
            &route.label,
            route_input,
            |cause| ErrorKind::CapabilityError { capability, cause },
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(abort) => return run.fail(abort),
        };

        let error = match &outcome.error {
            None => None,
            Some(kind) if kind.is_cancelled() => Some(guard.aborted().unwrap_or(ErrorKind::Cancelled)),
            Some(kind) => Some(kind.clone()),
        };
        // A route that ignored its token may still finish after an abort.
        let error = error.or_else(|| guard.aborted());
        let content = outcome.content.clone();
        run.steps.push(outcome);

        match error {
            Some(error) => {
                warn!(workflow = %self.name, route = %route.label, error = %error, "Route failed");
                run.fail(error)
            }
            None => {
                debug!(workflow = %self.name, route = %route.label, "Route completed");
                run.finish(WorkflowStatus::Completed, content)
            }
        }
    }

    /// Ask the classifier for a label.
    ///
    /// On failure, returns the classifier's outcome (when it was started)
    /// and the run error.
    async fn classify(
        &self,
        guard: &BudgetGuard,
        input: &Value,
    ) -> std::result::Result<(Outcome, String), (Option<Outcome>, ErrorKind)> {
        let routes: Vec<RouteDescription> = self.routes.iter().map(Route::describe).collect();
        let signal = guard.token().child_token();

        let metered = guard
            .run(self.classifier.classify(input, &routes, &signal))
            .await
            .map_err(|abort| (None, abort))?;

        match metered.result {
            Ok(classification) => {
                debug!(
                    workflow = %self.name,
                    label = %classification.label,
                    cost = metered.cost,
                    "Input classified"
                );
                let outcome = Outcome::success(
                    CLASSIFY_STEP,
                    json!(classification.label),
                    metered.cost,
                    metered.tokens,
                    metered.duration,
                );
                Ok((outcome, classification.label))
            }
            Err(e) if e.is_cancelled() => {
                let outcome =
                    Outcome::cancelled(CLASSIFY_STEP, metered.cost, metered.tokens, metered.duration);
                Err((
                    Some(outcome),
                    guard.aborted().unwrap_or(ErrorKind::Cancelled),
                ))
            }
            Err(e) => {
                warn!(workflow = %self.name, error = %e, "Classifier failed");
                let error = ErrorKind::CapabilityError {
                    capability: self.classifier.name().to_string(),
                    cause: e.to_string(),
                };
                let outcome = Outcome::failure(
                    CLASSIFY_STEP,
                    error.clone(),
                    metered.cost,
                    metered.tokens,
                    metered.duration,
                );
                Err((Some(outcome), error))
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("classifier", &self.classifier.name())
            .field("routes", &self.routes)
            .field("default_route", &self.default_route)
            .finish_non_exhaustive()
    }
}

/// Accumulates one router run's outcomes.
struct RouterRun<'a> {
    workflow: &'a str,
    started: Instant,
    steps: Vec<Outcome>,
    routed_to: Option<String>,
}

impl<'a> RouterRun<'a> {
    fn new(workflow: &'a str, started: Instant) -> Self {
        Self {
            workflow,
            started,
            steps: Vec::new(),
            routed_to: None,
        }
    }

    fn finish(self, status: WorkflowStatus, content: Value) -> WorkflowResult {
        let result = WorkflowResult::new(
            self.workflow,
            status,
            self.steps,
            BTreeMap::new(),
            content,
            self.started.elapsed(),
        );
        match self.routed_to {
            Some(label) => result.with_route(label),
            None => result,
        }
    }

    fn fail(self, error: ErrorKind) -> WorkflowResult {
        self.finish(WorkflowStatus::Failed, Value::Null)
            .with_error(error)
    }
}

#[async_trait]
impl Workflow for Router {
    fn descriptor(&self) -> WorkflowDescriptor {
        WorkflowDescriptor {
            name: self.name.clone(),
            version: self.env.config.version.clone(),
            topology: Topology::Router,
            members: self.routes.iter().map(|r| r.label.clone()).collect(),
            timeout: self.env.config.timeout(),
            max_cost: self.env.config.max_cost,
        }
    }

    async fn call(&self, input: Value) -> WorkflowResult {
        let descriptor = self.descriptor();
        self.env.record(&descriptor, self.execute(input)).await
    }
}
