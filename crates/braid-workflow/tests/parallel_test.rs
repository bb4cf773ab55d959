//! Integration tests for parallel fan-out.

use std::sync::Arc;
use std::time::Duration;

use braid_cache::{CacheConfig, CapabilityCache};
use braid_capability::{CapabilityKind, Completion, FnCapability, MockCapability};
use braid_types::{ErrorKind, WorkflowStatus};
use braid_workflow::{Branch, Parallel, Workflow};
use serde_json::json;

fn mock(name: &str, content: serde_json::Value, cost: f64) -> Arc<MockCapability> {
    Arc::new(MockCapability::new(name).returning(content).with_cost(cost))
}

#[tokio::test]
async fn test_tolerant_partial_failure() {
    let sentiment = mock("sentiment", json!("positive"), 0.01);
    let keywords = Arc::new(MockCapability::new("keywords").failing("timeout from provider"));
    let summary = mock("summary", json!("short"), 0.03);

    let parallel = Parallel::builder("analyze")
        .fail_fast(false)
        .branch(Branch::new("sentiment", sentiment))
        .branch(Branch::new("keywords", keywords))
        .branch(Branch::new("summary", summary))
        .build()
        .unwrap();

    let result = parallel.call(json!("great product")).await;

    assert_eq!(result.status, WorkflowStatus::Partial);
    assert!(result.error.is_none());
    assert_eq!(result.branches.len(), 3);
    assert!(result.branch("keywords").unwrap().error.is_some());
    assert_eq!(result.branch("sentiment").unwrap().content, json!("positive"));
    assert_eq!(result.branch("summary").unwrap().content, json!("short"));
    assert!((result.total_cost - 0.04).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_cancels_in_flight_branches() {
    let quick_failure = Arc::new(
        MockCapability::new("moderate")
            .failing("flagged")
            .with_delay(Duration::from_millis(10)),
    );
    let slow = Arc::new(
        MockCapability::new("summary")
            .returning(json!("never"))
            .with_delay(Duration::from_secs(30))
            .with_cancel_cost(0.05),
    );

    let parallel = Parallel::builder("guarded")
        .fail_fast(true)
        .branch(Branch::new("moderate", quick_failure))
        .branch(Branch::new("summary", slow.clone()))
        .build()
        .unwrap();

    let result = parallel.call(json!("text")).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(
        result.error,
        Some(ErrorKind::BranchFailure {
            branch: "moderate".into(),
            cause: "flagged".into()
        })
    );

    let summary = result.branch("summary").unwrap();
    assert!(summary.is_cancelled());
    assert_eq!(summary.content, serde_json::Value::Null);
    // Partial spend reported at cancellation is still charged.
    assert!((summary.cost - 0.05).abs() < 1e-9);
    assert!((result.total_cost - 0.05).abs() < 1e-9);
    assert!(result.total_duration < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_panicking_branch_cancels_siblings() {
    let exploding = Arc::new(FnCapability::from_fn(
        "explode",
        |input: serde_json::Value, _signal| async move {
            if input.is_null() {
                panic!("capability bug");
            }
            Ok(Completion::new(input))
        },
    ));
    let slow = Arc::new(
        MockCapability::new("slow")
            .returning(json!("done"))
            .with_delay(Duration::from_secs(30)),
    );

    let parallel = Parallel::builder("volatile")
        .fail_fast(true)
        .branch(Branch::new("explode", exploding))
        .branch(Branch::new("slow", slow))
        .build()
        .unwrap();

    let result = parallel.call(json!(null)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(
        result.error,
        Some(ErrorKind::BranchFailure {
            branch: "explode".into(),
            cause: "branch task panicked".into()
        })
    );
    assert!(result.branch("explode").unwrap().is_failure());
    let sibling = result.branch("slow").unwrap();
    assert!(sibling.is_cancelled());
    assert_eq!(sibling.content, serde_json::Value::Null);
    assert!(result.total_duration < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_omits_branches_that_never_started() {
    let failing = Arc::new(MockCapability::new("first").failing("bad input"));
    let queued = mock("queued", json!("late"), 0.5);

    let parallel = Parallel::builder("queued")
        .fail_fast(true)
        .max_concurrency(1)
        .branch(Branch::new("first", failing))
        .branch(Branch::new("queued", queued.clone()))
        .build()
        .unwrap();

    let result = parallel.call(json!(null)).await;

    assert!(result.is_failed());
    assert_eq!(queued.call_count(), 0);
    assert!(result.branch("queued").is_none());
    assert!(result.branch("first").unwrap().is_failure());
}

#[tokio::test]
async fn test_tolerant_all_failed_is_failed() {
    let parallel = Parallel::builder("all-bad")
        .branch(Branch::new(
            "a",
            Arc::new(MockCapability::new("a").failing("x")),
        ))
        .branch(Branch::new(
            "b",
            Arc::new(MockCapability::new("b").failing("y")),
        ))
        .build()
        .unwrap();

    let result = parallel.call(json!(null)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(matches!(
        result.error,
        Some(ErrorKind::BranchFailure { ref branch, .. }) if branch == "a"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shared_embedding_is_computed_once() {
    let embedder = Arc::new(
        MockCapability::new("embedder")
            .with_kind(CapabilityKind::Embedder)
            .returning(json!([0.1, 0.2]))
            .with_cost(0.02)
            .with_delay(Duration::from_millis(50)),
    );
    let cache = CapabilityCache::new(CacheConfig::new());

    let parallel = Parallel::builder("embed-twice")
        .with_cache(cache.clone())
        .branch(Branch::new("left", embedder.clone()))
        .branch(Branch::new("right", embedder.clone()))
        .build()
        .unwrap();

    let result = parallel.call(json!("same text")).await;

    assert!(result.is_completed());
    assert_eq!(embedder.call_count(), 1);
    assert_eq!(
        result.branch("left").unwrap().content,
        result.branch("right").unwrap().content
    );
    let hits = result.branches.values().filter(|o| o.cache_hit).count();
    assert_eq!(hits, 1);
    assert!((result.total_cost - 0.02).abs() < 1e-9);
    assert_eq!(cache.stats().await.coalesced, 1);
}
