//! Integration tests for sequential pipelines.

use std::sync::Arc;

use braid_capability::MockCapability;
use braid_types::{ErrorKind, ExecutionEvent, RecordStatus, WorkflowStatus};
use braid_workflow::{MemorySink, Pipeline, Step, Workflow};
use serde_json::json;

fn mock(name: &str, content: serde_json::Value, cost: f64) -> Arc<MockCapability> {
    Arc::new(MockCapability::new(name).returning(content).with_cost(cost))
}

#[tokio::test]
async fn test_optional_failure_keeps_previous_content() {
    let extract = mock("extract", json!({"text": "refund please"}), 0.02);
    let classify = mock("classify", json!("billing"), 0.01);
    let format = Arc::new(MockCapability::new("format").failing("template error"));

    let pipeline = Pipeline::builder("ticket")
        .step(Step::new("extract", extract))
        .step(Step::new("classify", classify))
        .step(Step::new("format", format.clone()).optional())
        .build()
        .unwrap();

    let result = pipeline.call(json!("raw ticket")).await;

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert!(result.error.is_none());
    assert_eq!(result.content, json!("billing"));
    assert_eq!(format.call_count(), 1);
    assert_eq!(
        result.step("format").unwrap().error,
        Some(ErrorKind::OptionalStepFailure {
            step: "format".into(),
            cause: "template error".into()
        })
    );

    let names: Vec<&str> = result.steps.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["extract", "classify", "format"]);
}

#[tokio::test]
async fn test_failed_step_cost_is_counted() {
    let a = mock("a", json!("A"), 0.25);
    let b = Arc::new(
        MockCapability::new("b")
            .failing("partial output")
            .with_cost(0.15),
    );

    let pipeline = Pipeline::builder("costly")
        .step(Step::new("a", a))
        .step(Step::new("b", b).optional())
        .build()
        .unwrap();

    let result = pipeline.call(json!(null)).await;

    let sum: f64 = result.steps.iter().map(|o| o.cost).sum();
    assert!((result.total_cost - sum).abs() < 1e-9);
    assert!((result.total_cost - 0.40).abs() < 1e-9);
}

#[tokio::test]
async fn test_conditional_step_reads_context() {
    let detect = mock("detect", json!({"language": "fr"}), 0.0);
    let translate = Arc::new(MockCapability::new("translate").echoing());
    let summarize = Arc::new(MockCapability::new("summarize").returning(json!("summary")));

    let pipeline = Pipeline::builder("translate-then-summarize")
        .step(Step::new("detect", detect))
        .step(
            Step::new("translate", translate.clone())
                .when(|ctx| {
                    ctx.content("detect")
                        .and_then(|d| d["language"].as_str())
                        .is_some_and(|lang| lang != "en")
                })
                .transform(|ctx| ctx.input().clone()),
        )
        .step(Step::new("summarize", summarize.clone()).transform(|ctx| {
            ctx.content("translate")
                .cloned()
                .unwrap_or_else(|| ctx.input().clone())
        }))
        .build()
        .unwrap();

    let result = pipeline.call(json!("bonjour")).await;

    assert!(result.is_completed());
    assert_eq!(translate.inputs(), vec![json!("bonjour")]);
    assert_eq!(summarize.inputs(), vec![json!("bonjour")]);
    assert_eq!(result.content, json!("summary"));
}

#[tokio::test]
async fn test_skipped_step_is_absent_to_later_transforms() {
    let gate = Arc::new(MockCapability::new("gate").returning(json!("unused")));
    let last = Arc::new(MockCapability::new("last").echoing());

    let pipeline = Pipeline::builder("absent")
        .step(Step::new("gate", gate).when(|_| false))
        .step(Step::new("last", last.clone()).transform(|ctx| {
            json!({
                "gate_seen": ctx.content("gate").is_some(),
                "gate_recorded": ctx.contains("gate"),
            })
        }))
        .build()
        .unwrap();

    pipeline.call(json!(null)).await;
    assert_eq!(
        last.inputs(),
        vec![json!({"gate_seen": false, "gate_recorded": true})]
    );
}

#[tokio::test]
async fn test_records_are_emitted() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::builder("recorded")
        .version("7")
        .with_sink(sink.clone())
        .step(Step::new("only", mock("only", json!("done"), 0.5)))
        .build()
        .unwrap();

    let result = pipeline.call(json!(null)).await;
    let events = sink.events();

    assert_eq!(events.len(), 2);
    let ExecutionEvent::Created(created) = &events[0] else {
        panic!("expected a created event first");
    };
    let ExecutionEvent::Updated(updated) = &events[1] else {
        panic!("expected an updated event second");
    };
    assert_eq!(created.id, updated.id);
    assert_eq!(created.status, RecordStatus::Running);
    assert_eq!(created.version, "7");
    assert_eq!(updated.status, RecordStatus::Completed);
    assert_eq!(updated.result.as_ref(), Some(&result));
    assert!(updated.finished_at.is_some());
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_context() {
    let echo = Arc::new(MockCapability::new("echo").echoing());
    let pipeline = Arc::new(
        Pipeline::builder("isolated")
            .step(Step::new("echo", echo))
            .build()
            .unwrap(),
    );

    let runs = (0..8).map(|i| {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { (i, pipeline.call(json!(i)).await) })
    });

    for joined in futures::future::join_all(runs).await {
        let (i, result) = joined.unwrap();
        assert_eq!(result.content, json!(i));
        assert_eq!(result.steps.len(), 1);
    }
}
