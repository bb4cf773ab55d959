//! Integration tests for run budgets and caching across runs.

use std::sync::Arc;
use std::time::Duration;

use braid_cache::{CacheConfig, CapabilityCache};
use braid_capability::{CapabilityKind, MockCapability};
use braid_types::{ErrorKind, WorkflowStatus};
use braid_workflow::{Branch, Parallel, Pipeline, Step, Workflow, WorkflowConfig};
use serde_json::json;

fn mock(name: &str, cost: f64) -> Arc<MockCapability> {
    Arc::new(
        MockCapability::new(name)
            .returning(json!(name))
            .with_cost(cost),
    )
}

#[tokio::test]
async fn test_cost_ceiling_stops_before_next_step() {
    let third = mock("third", 0.10);
    let pipeline = Pipeline::builder("spendy")
        .max_cost(1.00)
        .step(Step::new("first", mock("first", 0.60)))
        .step(Step::new("second", mock("second", 0.50)))
        .step(Step::new("third", third.clone()))
        .build()
        .unwrap();

    let result = pipeline.call(json!(null)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(matches!(
        result.error,
        Some(ErrorKind::BudgetExceeded { limit, .. }) if limit == 1.00
    ));
    assert_eq!(third.call_count(), 0);
    assert!(result.step("third").is_none());
    assert_eq!(result.steps.len(), 2);
    assert!((result.total_cost - 1.10).abs() < 1e-9);
}

#[tokio::test]
async fn test_last_step_may_cross_the_ceiling() {
    let pipeline = Pipeline::builder("last-step")
        .max_cost(1.00)
        .step(Step::new("first", mock("first", 0.60)))
        .step(Step::new("second", mock("second", 0.50)))
        .build()
        .unwrap();

    let result = pipeline.call(json!(null)).await;

    // No further step was refused, so nothing was aborted.
    assert!(result.is_completed());
    assert!((result.total_cost - 1.10).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_slow_step() {
    let slow = Arc::new(
        MockCapability::new("slow")
            .returning(json!("late"))
            .with_delay(Duration::from_secs(60))
            .with_cancel_cost(0.03),
    );
    let after = mock("after", 0.0);

    let pipeline = Pipeline::builder("deadline")
        .with_config(WorkflowConfig::new().with_timeout(Duration::from_secs(5)))
        .step(Step::new("slow", slow))
        .step(Step::new("after", after.clone()))
        .build()
        .unwrap();

    let result = pipeline.call(json!(null)).await;

    assert!(result.is_failed());
    assert!(matches!(
        result.error,
        Some(ErrorKind::TimeoutExceeded { limit_ms: 5000, .. })
    ));
    assert!(result.step("slow").unwrap().is_cancelled());
    assert_eq!(after.call_count(), 0);
    assert!((result.total_cost - 0.03).abs() < 1e-9);
    assert!(result.total_duration < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_step_ignoring_deadline_overruns_and_fails() {
    let stubborn = Arc::new(
        MockCapability::new("stubborn")
            .returning(json!("late"))
            .with_delay(Duration::from_secs(10))
            .with_cost(0.2)
            .uncooperative(),
    );
    let after = mock("after", 0.0);

    let pipeline = Pipeline::builder("overrun")
        .timeout(Duration::from_secs(1))
        .step(Step::new("stubborn", stubborn))
        .step(Step::new("after", after.clone()))
        .build()
        .unwrap();

    let result = pipeline.call(json!(null)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(matches!(
        result.error,
        Some(ErrorKind::TimeoutExceeded { limit_ms: 1000, .. })
    ));
    // The call ran to its own end and its spend is charged.
    assert!(result.total_duration >= Duration::from_secs(10));
    assert!(result.step("stubborn").unwrap().is_success());
    assert!((result.total_cost - 0.2).abs() < 1e-9);
    assert_eq!(after.call_count(), 0);
}

#[tokio::test]
async fn test_budget_abort_marks_unstarted_tolerant_branches_cancelled() {
    let second = mock("second", 0.1);
    let third = mock("third", 0.1);

    let parallel = Parallel::builder("metered")
        .fail_fast(false)
        .max_concurrency(1)
        .max_cost(0.50)
        .branch(Branch::new("first", mock("first", 0.60)))
        .branch(Branch::new("second", second.clone()))
        .branch(Branch::new("third", third.clone()))
        .build()
        .unwrap();

    let result = parallel.call(json!(null)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(matches!(
        result.error,
        Some(ErrorKind::BudgetExceeded { limit, .. }) if limit == 0.50
    ));
    assert_eq!(result.branches.len(), 3);
    assert!(result.branch("first").unwrap().is_success());
    for name in ["second", "third"] {
        let outcome = result.branch(name).unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.cost, 0.0);
    }
    assert_eq!(second.call_count(), 0);
    assert_eq!(third.call_count(), 0);
    assert!((result.total_cost - 0.60).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_parallel_branches() {
    let slow = |name: &str| {
        Arc::new(
            MockCapability::new(name)
                .returning(json!(name))
                .with_delay(Duration::from_secs(60)),
        )
    };
    let parallel = Parallel::builder("deadline")
        .timeout(Duration::from_secs(2))
        .branch(Branch::new("a", slow("a")))
        .branch(Branch::new("b", slow("b")))
        .build()
        .unwrap();

    let result = parallel.call(json!(null)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(matches!(
        result.error,
        Some(ErrorKind::TimeoutExceeded { .. })
    ));
    assert_eq!(result.branches.len(), 2);
    assert!(result.branches.values().all(|o| o.is_cancelled()));
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_across_runs_is_free() {
    let embedder = Arc::new(
        MockCapability::new("embedder")
            .with_kind(CapabilityKind::Embedder)
            .returning(json!([0.5, 0.5]))
            .with_cost(0.04),
    );
    let cache = CapabilityCache::new(
        CacheConfig::new().with_capability_ttl("embedder", Duration::from_secs(60)),
    );
    let pipeline = Pipeline::builder("embed")
        .with_cache(cache)
        .step(Step::new("embed", embedder.clone()))
        .build()
        .unwrap();

    let first = pipeline.call(json!("hello")).await;
    let second = pipeline.call(json!("  hello ")).await;

    assert_eq!(first.content, second.content);
    assert!((first.total_cost - 0.04).abs() < 1e-9);
    assert_eq!(second.total_cost, 0.0);
    assert!(second.step("embed").unwrap().cache_hit);
    assert_eq!(embedder.call_count(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    let third = pipeline.call(json!("hello")).await;

    assert!(!third.step("embed").unwrap().cache_hit);
    assert_eq!(embedder.call_count(), 2);
}

#[tokio::test]
async fn test_agents_bypass_cache_unless_asked() {
    let agent = mock("agent", 0.1);
    let cache = CapabilityCache::new(CacheConfig::new());

    let default = Pipeline::builder("default")
        .with_cache(cache.clone())
        .step(Step::new("agent", agent.clone()))
        .build()
        .unwrap();
    default.call(json!("q")).await;
    default.call(json!("q")).await;
    assert_eq!(agent.call_count(), 2);

    let forced = Pipeline::builder("forced")
        .with_cache(cache)
        .step(Step::new("agent", agent.clone()).cached(true))
        .build()
        .unwrap();
    forced.call(json!("q")).await;
    forced.call(json!("q")).await;
    assert_eq!(agent.call_count(), 3);
}

#[test]
fn test_negative_budget_rejected_at_declaration() {
    let err = Pipeline::builder("bad")
        .max_cost(-0.5)
        .step(Step::new("a", mock("a", 0.0)))
        .build();
    assert!(err.is_err());
}
