//! Scriptable capability for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use braid_types::TokenUsage;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::capability::{
    Capability, CapabilityKind, Classification, Completion, RouteDescription, checkpoint,
};
use crate::error::{CapabilityError, Result};

#[derive(Debug, Clone)]
enum Response {
    Content(Value),
    Echo,
    Failure(String),
}

/// A mock capability for testing workflows.
///
/// Returns a fixed response (or echoes its input), charges a fixed cost, can
/// sleep before answering, and records every input it was invoked with.
/// While sleeping it observes its cancellation token and reports
/// `cancel_cost` as partial spend when cancelled.
#[derive(Debug)]
pub struct MockCapability {
    name: String,
    version: String,
    kind: CapabilityKind,
    settings: Value,
    response: Response,
    cost: f64,
    tokens: TokenUsage,
    delay: Option<Duration>,
    cancel_cost: f64,
    cooperative: bool,
    label: Option<String>,
    classify_cost: f64,
    calls: AtomicUsize,
    classify_calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
    offered_routes: Mutex<Vec<RouteDescription>>,
}

impl MockCapability {
    /// A mock that returns `null` for free.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0".to_string(),
            kind: CapabilityKind::Agent,
            settings: Value::Null,
            response: Response::Content(Value::Null),
            cost: 0.0,
            tokens: TokenUsage::default(),
            delay: None,
            cancel_cost: 0.0,
            cooperative: true,
            label: None,
            classify_cost: 0.0,
            calls: AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            offered_routes: Mutex::new(Vec::new()),
        }
    }

    /// Return `content` from every invocation.
    pub fn returning(mut self, content: Value) -> Self {
        self.response = Response::Content(content);
        self
    }

    /// Return the invocation input unchanged.
    pub fn echoing(mut self) -> Self {
        self.response = Response::Echo;
        self
    }

    /// Fail every invocation with `message`, still charging the configured cost.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.response = Response::Failure(message.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Spend reported when cancelled during the delay.
    pub fn with_cancel_cost(mut self, cost: f64) -> Self {
        self.cancel_cost = cost;
        self
    }

    /// Ignore the cancellation token while sleeping.
    pub fn uncooperative(mut self) -> Self {
        self.cooperative = false;
        self
    }

    pub fn with_kind(mut self, kind: CapabilityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// Answer `classify` with `label`, charging `cost`.
    pub fn classifying(mut self, label: impl Into<String>, cost: f64) -> Self {
        self.label = Some(label.into());
        self.classify_cost = cost;
        self
    }

    /// Number of `invoke` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `classify` calls made.
    pub fn classify_count(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    /// Inputs passed to `invoke` and `classify`, in call order.
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }

    /// Routes offered on the most recent `classify` call.
    pub fn offered_routes(&self) -> Vec<RouteDescription> {
        self.offered_routes.lock().clone()
    }

    async fn wait(&self, signal: &CancellationToken) -> Result<()> {
        let Some(delay) = self.delay else {
            return Ok(());
        };
        if !self.cooperative {
            tokio::time::sleep(delay).await;
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = signal.cancelled() => Err(CapabilityError::cancelled()
                .with_spend(self.cancel_cost, TokenUsage::default())),
        }
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn settings(&self) -> Value {
        self.settings.clone()
    }

    async fn invoke(&self, input: Value, signal: &CancellationToken) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());
        trace!(capability = %self.name, "mock invoked");

        checkpoint(signal)?;
        self.wait(signal).await?;

        match &self.response {
            Response::Content(content) => Ok(Completion::new(content.clone())
                .with_cost(self.cost)
                .with_tokens(self.tokens)),
            Response::Echo => Ok(Completion::new(input)
                .with_cost(self.cost)
                .with_tokens(self.tokens)),
            Response::Failure(message) => {
                Err(CapabilityError::failed(message.clone()).with_spend(self.cost, self.tokens))
            }
        }
    }

    async fn classify(
        &self,
        input: &Value,
        routes: &[RouteDescription],
        signal: &CancellationToken,
    ) -> Result<Classification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());
        *self.offered_routes.lock() = routes.to_vec();

        checkpoint(signal)?;
        self.wait(signal).await?;

        if let Response::Failure(message) = &self.response {
            return Err(
                CapabilityError::failed(message.clone()).with_spend(self.classify_cost, self.tokens)
            );
        }
        match &self.label {
            Some(label) => Ok(Classification::new(label.clone())
                .with_cost(self.classify_cost)
                .with_tokens(self.tokens)),
            None => Err(CapabilityError::Unsupported {
                capability: self.name.clone(),
                operation: "classify",
            }),
        }
    }
}
