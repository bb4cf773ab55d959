//! The capability trait and its request/response types.

use std::sync::Arc;

use async_trait::async_trait;
use braid_types::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{CapabilityError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Request / response types
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of unit a capability is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Generative model call.
    Agent,
    /// Deterministic vector embedding.
    Embedder,
    /// Content moderation.
    Moderator,
}

impl CapabilityKind {
    /// Whether identical input always yields identical output.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, CapabilityKind::Embedder)
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::Agent => write!(f, "agent"),
            CapabilityKind::Embedder => write!(f, "embedder"),
            CapabilityKind::Moderator => write!(f, "moderator"),
        }
    }
}

/// A successful capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Value,
    pub cost: f64,
    pub tokens: TokenUsage,
}

impl Completion {
    /// A completion that spent nothing.
    pub fn new(content: Value) -> Self {
        Self {
            content,
            cost: 0.0,
            tokens: TokenUsage::default(),
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }
}

/// A route offered to a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescription {
    pub label: String,
    pub description: Option<String>,
}

impl RouteDescription {
    pub fn new(label: impl Into<String>, description: Option<String>) -> Self {
        Self {
            label: label.into(),
            description,
        }
    }
}

/// A classifier's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub cost: f64,
    pub tokens: TokenUsage,
}

impl Classification {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cost: 0.0,
            tokens: TokenUsage::default(),
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability trait
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of work a workflow step, branch, or route ultimately calls.
///
/// Implementations must observe `signal` at their own checkpoints and return
/// [`CapabilityError::Cancelled`] (with any spend so far) once it fires.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Identity used in logs and cache fingerprints.
    fn name(&self) -> &str;

    /// Version of the capability; bumping it invalidates cached outcomes.
    fn version(&self) -> &str {
        "0"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Agent
    }

    /// Configuration that changes output for identical input, such as
    /// embedding dimensionality or model name.
    fn settings(&self) -> Value {
        Value::Null
    }

    /// Run the capability.
    async fn invoke(&self, input: Value, signal: &CancellationToken) -> Result<Completion>;

    /// Pick one of `routes` for `input`. Only router classifiers implement
    /// this.
    async fn classify(
        &self,
        _input: &Value,
        _routes: &[RouteDescription],
        _signal: &CancellationToken,
    ) -> Result<Classification> {
        Err(CapabilityError::Unsupported {
            capability: self.name().to_string(),
            operation: "classify",
        })
    }
}

/// A capability that can be shared across steps and tasks.
pub type SharedCapability = Arc<dyn Capability>;

/// Cooperative cancellation checkpoint for capability implementations.
pub fn checkpoint(signal: &CancellationToken) -> Result<()> {
    if signal.is_cancelled() {
        Err(CapabilityError::cancelled())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Capability for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn invoke(&self, input: Value, signal: &CancellationToken) -> Result<Completion> {
            checkpoint(signal)?;
            let text = input.as_str().unwrap_or_default().to_uppercase();
            Ok(Completion::new(json!(text)).with_cost(0.01))
        }
    }

    #[tokio::test]
    async fn test_default_methods() {
        let cap = Upper;
        assert_eq!(cap.version(), "0");
        assert_eq!(cap.kind(), CapabilityKind::Agent);
        assert_eq!(cap.settings(), Value::Null);

        let err = cap
            .classify(&json!("x"), &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_checkpoint_observes_token() {
        let cap = Upper;
        let token = CancellationToken::new();
        let done = cap.invoke(json!("hi"), &token).await.unwrap();
        assert_eq!(done.content, json!("HI"));

        token.cancel();
        let err = cap.invoke(json!("hi"), &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_kind_determinism() {
        assert!(CapabilityKind::Embedder.is_deterministic());
        assert!(!CapabilityKind::Agent.is_deterministic());
        assert_eq!(CapabilityKind::Moderator.to_string(), "moderator");
    }
}
