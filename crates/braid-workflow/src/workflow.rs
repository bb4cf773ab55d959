//! The call surface shared by every topology.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use braid_cache::CapabilityCache;
use braid_capability::Capability;
use braid_types::{ExecutionEvent, ExecutionRecord, WorkflowDescriptor, WorkflowResult};
use serde_json::Value;
use tracing::info;

use crate::budget::BudgetGuard;
use crate::config::WorkflowConfig;
use crate::sink::{NoopSink, SharedSink};

/// A declared, immutable workflow.
///
/// `call` never fails: run-time failures are reported through the result's
/// `status` and `error`.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Declaration surface for tooling and dashboards.
    fn descriptor(&self) -> WorkflowDescriptor;

    /// Run the workflow once on `input`.
    async fn call(&self, input: Value) -> WorkflowResult;
}

/// A workflow that can be shared across tasks.
pub type SharedWorkflow = Arc<dyn Workflow>;

/// Collaborators and settings every topology carries.
#[derive(Clone)]
pub(crate) struct Environment {
    pub config: WorkflowConfig,
    pub cache: Option<CapabilityCache>,
    pub sink: SharedSink,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            config: WorkflowConfig::default(),
            cache: None,
            sink: Arc::new(NoopSink),
        }
    }
}

impl Environment {
    /// A fresh budget for one run.
    pub fn guard(&self) -> BudgetGuard {
        BudgetGuard::from_config(&self.config)
    }

    /// The cache to use for a member, if any.
    ///
    /// `preference` is the member's explicit choice; without one, the cache
    /// decides from the capability's kind.
    pub fn cache_for(
        &self,
        preference: Option<bool>,
        capability: &dyn Capability,
    ) -> Option<&CapabilityCache> {
        let cache = self.cache.as_ref()?;
        match preference {
            Some(true) => Some(cache),
            Some(false) => None,
            None => cache.applies_to(capability).then_some(cache),
        }
    }

    /// Wrap one run with execution records and lifecycle logs.
    pub async fn record<F>(&self, descriptor: &WorkflowDescriptor, run: F) -> WorkflowResult
    where
        F: Future<Output = WorkflowResult>,
    {
        let record = ExecutionRecord::started(descriptor);
        info!(
            workflow = %descriptor.name,
            topology = %descriptor.topology,
            execution_id = %record.id,
            "Workflow started"
        );
        self.sink.emit(ExecutionEvent::Created(record.clone()));

        let result = run.await;

        info!(
            workflow = %descriptor.name,
            execution_id = %record.id,
            status = %result.status,
            total_cost = result.total_cost,
            duration_ms = result.total_duration.as_millis() as u64,
            "Workflow completed"
        );
        self.sink
            .emit(ExecutionEvent::Updated(record.finished(&result)));
        result
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Builder setters shared by every topology's builder.
macro_rules! environment_setters {
    () => {
        /// Version reported in descriptors and execution records.
        pub fn version(mut self, version: impl Into<String>) -> Self {
            self.env.config.version = version.into();
            self
        }

        /// Bound each run's wall time.
        pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
            self.env.config = self.env.config.with_timeout(timeout);
            self
        }

        /// Bound each run's cumulative cost.
        pub fn max_cost(mut self, max_cost: f64) -> Self {
            self.env.config = self.env.config.with_max_cost(max_cost);
            self
        }

        /// Replace version and budget in one go.
        pub fn with_config(mut self, config: $crate::config::WorkflowConfig) -> Self {
            self.env.config = config;
            self
        }

        /// Route eligible capability calls through `cache`.
        pub fn with_cache(mut self, cache: braid_cache::CapabilityCache) -> Self {
            self.env.cache = Some(cache);
            self
        }

        /// Emit execution records to `sink`.
        pub fn with_sink(mut self, sink: $crate::sink::SharedSink) -> Self {
            self.env.sink = sink;
            self
        }
    };
}

pub(crate) use environment_setters;

#[cfg(test)]
mod tests {
    use super::*;
    use braid_cache::CacheConfig;
    use braid_capability::{CapabilityKind, MockCapability};

    #[test]
    fn test_cache_for_respects_preference() {
        let env = Environment {
            cache: Some(CapabilityCache::new(CacheConfig::new())),
            ..Environment::default()
        };
        let agent = MockCapability::new("agent");
        let embedder = MockCapability::new("embedder").with_kind(CapabilityKind::Embedder);

        assert!(env.cache_for(None, &agent).is_none());
        assert!(env.cache_for(None, &embedder).is_some());
        assert!(env.cache_for(Some(true), &agent).is_some());
        assert!(env.cache_for(Some(false), &embedder).is_none());
    }

    #[test]
    fn test_no_cache_configured() {
        let env = Environment::default();
        let embedder = MockCapability::new("embedder").with_kind(CapabilityKind::Embedder);
        assert!(env.cache_for(Some(true), &embedder).is_none());
    }
}
