//! Closure-backed capabilities.
//!
//! `FnCapability` lets callers declare a capability at runtime from an async
//! closure instead of writing a type that implements [`Capability`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, CapabilityKind, Completion};
use crate::error::Result;

/// Async function backing a [`FnCapability`].
///
/// Takes owned input and the call's cancellation token.
pub type InvokeFn =
    Arc<dyn Fn(Value, CancellationToken) -> BoxFuture<'static, Result<Completion>> + Send + Sync>;

/// A capability built from an async closure.
pub struct FnCapability {
    name: String,
    version: String,
    kind: CapabilityKind,
    settings: Value,
    invoke_fn: InvokeFn,
}

impl FnCapability {
    /// Create a new closure-backed agent capability.
    pub fn new(name: impl Into<String>, invoke_fn: InvokeFn) -> Self {
        Self {
            name: name.into(),
            version: "0".to_string(),
            kind: CapabilityKind::Agent,
            settings: Value::Null,
            invoke_fn,
        }
    }

    /// Create a capability from any async function of `(input, signal)`.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Completion>> + Send + 'static,
    {
        let invoke_fn: InvokeFn = Arc::new(
            move |input: Value, signal: CancellationToken| -> BoxFuture<'static, Result<Completion>> {
                Box::pin(f(input, signal))
            },
        );
        Self::new(name, invoke_fn)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_kind(mut self, kind: CapabilityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }
}

impl std::fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl Capability for FnCapability {
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
        (self.invoke_fn)(input, signal.clone()).await
    }
}
