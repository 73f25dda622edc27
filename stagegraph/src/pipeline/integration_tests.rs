//! End-to-end tests of graph building and execution.

use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::{ArtifactMeta, Artifacts, EventRecord, StageStatus};
use crate::errors::{GraphError, StageFailure, StoreError};
use crate::pipeline::{
    EngineConfig, InMemoryRunLedger, PipelineBuilder, RunLedger, StageGraph, StageRegistry,
    StageSpec, EVENT_OUTPUT,
};
use crate::stages::{predicates, FnStage, ObserverConfig, ObserverStage, Stage};
use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore, StoreConfig};
use crate::testing::{
    assert_completed_before, assert_run_succeeded, assert_stage_failed_with, assert_stage_status,
    CountingTrigger, ExecutionLog, FailingStage, RecordingStage, ScriptedEventSource, TestHarness,
};

fn recording(name: &str, log: &ExecutionLog) -> Arc<RecordingStage> {
    Arc::new(
        RecordingStage::new(name)
            .with_log(log)
            .with_output("out", format!("{name}-output")),
    )
}

fn outlier_observer(trigger: Arc<CountingTrigger>, config: ObserverConfig) -> ObserverStage {
    ObserverStage::new(trigger, predicates::field_equals("is_outlier", json!([1]))).with_config(config)
}

fn diamond(log: &ExecutionLog) -> (StageGraph, Arc<RecordingStage>) {
    let d = recording("D", log);
    let graph = PipelineBuilder::new("diamond")
        .stage("A", recording("A", log), &[])
        .stage("B", recording("B", log), &["A"])
        .stage("C", recording("C", log), &["A"])
        .stage("D", d.clone(), &["B", "C"])
        .build()
        .unwrap();
    (graph, d)
}

#[tokio::test]
async fn test_diamond_respects_dependencies() {
    let log = ExecutionLog::new();
    let (graph, d) = diamond(&log);

    let result = TestHarness::new().run(&graph).await.unwrap();

    assert_run_succeeded(&result);
    assert_completed_before(&result, "A", "B");
    assert_completed_before(&result, "A", "C");
    assert_completed_before(&result, "B", "D");
    assert_completed_before(&result, "C", "D");
    assert_eq!(log.position("A"), Some(0));
    assert_eq!(log.position("D"), Some(3));

    let inputs = d.last_inputs().unwrap();
    assert_eq!(inputs.require("B", "out").unwrap().as_ref(), b"B-output");
    assert_eq!(inputs.require("C", "out").unwrap().as_ref(), b"C-output");
    assert!(inputs.from("A").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_independent_stages_run_concurrently() {
    let log = ExecutionLog::new();
    let slow = |name: &str| -> Arc<dyn Stage> {
        Arc::new(RecordingStage::new(name).with_log(&log).with_delay(Duration::from_secs(1)))
    };
    let graph = PipelineBuilder::new("fanout")
        .stage("A", slow("A"), &[])
        .stage("B", slow("B"), &["A"])
        .stage("C", slow("C"), &["A"])
        .build()
        .unwrap();

    let started = Instant::now();
    let result = TestHarness::new().run(&graph).await.unwrap();
    let concurrent = started.elapsed();

    assert_run_succeeded(&result);
    assert!(concurrent < Duration::from_secs(3), "took {concurrent:?}");

    let started = Instant::now();
    let result = TestHarness::new()
        .with_config(EngineConfig::new().with_max_concurrency(1))
        .run(&graph)
        .await
        .unwrap();
    assert_run_succeeded(&result);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn test_sequential_mode_follows_execution_order() {
    let log = ExecutionLog::new();
    let (graph, _) = diamond(&log);

    let result = TestHarness::new()
        .with_config(EngineConfig::sequential())
        .run(&graph)
        .await
        .unwrap();

    assert_run_succeeded(&result);
    assert_eq!(log.entries(), graph.execution_order());
    assert_eq!(result.order_of_completion, graph.execution_order());
}

#[tokio::test(start_paused = true)]
async fn test_observer_times_out_after_about_ten_polls() {
    let trigger = Arc::new(CountingTrigger::new());
    let config = ObserverConfig::new()
        .with_poll_interval(Duration::from_secs(2))
        .with_timeout(Duration::from_secs(20))
        .retrigger_each_poll();
    let graph = PipelineBuilder::new("outliers")
        .observer("E", outlier_observer(trigger.clone(), config), &[])
        .build()
        .unwrap();

    let harness = TestHarness::new();
    harness.events.push_json(json!({"is_outlier": [0]}));
    let result = harness.run(&graph).await.unwrap();

    assert_stage_failed_with(&result, "E", "observe_timeout");
    let Some(StageFailure::ObserveTimeout { polls, elapsed_ms, .. }) =
        result.stage("E").and_then(|s| s.error.clone())
    else {
        panic!("expected an observe timeout");
    };
    assert!((10..=11).contains(&polls), "polls = {polls}");
    assert!(elapsed_ms >= 20_000);
    assert_eq!(trigger.count(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_observer_publishes_matching_event() {
    let trigger = Arc::new(CountingTrigger::new());
    let config = ObserverConfig::new()
        .with_poll_interval(Duration::from_secs(2))
        .with_timeout(Duration::from_secs(20));
    let log = ExecutionLog::new();
    let report = recording("report", &log);
    let graph = PipelineBuilder::new("outliers")
        .observer("E", outlier_observer(trigger.clone(), config), &[])
        .stage("report", report.clone(), &["E"])
        .build()
        .unwrap();

    let harness = TestHarness::new();
    let events = harness.events.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        events.push_json(json!({"is_outlier": [0], "id": "a"}));
        events.push_json(json!({"is_outlier": [1], "id": "b"}));
    });
    let result = harness.run(&graph).await.unwrap();

    assert_run_succeeded(&result);
    assert_eq!(trigger.count(), 1);

    let stored = harness.store.get("E/event").await.unwrap();
    let record: EventRecord = serde_json::from_slice(&stored).unwrap();
    assert_eq!(record.get("id"), Some(&json!("b")));

    let seen: EventRecord = report.last_inputs().unwrap().json("E", EVENT_OUTPUT).unwrap();
    assert_eq!(seen, record);
}

#[tokio::test(start_paused = true)]
async fn test_observer_trigger_failure() {
    let trigger = Arc::new(CountingTrigger::failing("endpoint refused"));
    let source = Arc::new(ScriptedEventSource::new());
    let graph = PipelineBuilder::new("outliers")
        .observer("E", outlier_observer(trigger, ObserverConfig::new()), &[])
        .build()
        .unwrap();

    let result = TestHarness::new()
        .with_event_source(source.clone())
        .run(&graph)
        .await
        .unwrap();

    assert_stage_failed_with(&result, "E", "trigger");
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_observer_source_failure() {
    let source = Arc::new(
        ScriptedEventSource::new()
            .then_empty(2)
            .then_error(crate::errors::SourceError::Fetch("log stream closed".to_string())),
    );
    let graph = PipelineBuilder::new("outliers")
        .observer(
            "E",
            outlier_observer(Arc::new(CountingTrigger::new()), ObserverConfig::new()),
            &[],
        )
        .build()
        .unwrap();

    let result = TestHarness::new()
        .with_event_source(source.clone())
        .run(&graph)
        .await
        .unwrap();

    assert_stage_failed_with(&result, "E", "event_source");
    assert_eq!(source.fetch_count(), 3);
}

#[tokio::test]
async fn test_unknown_predecessor_fails_before_execution() {
    let log = ExecutionLog::new();
    let f = recording("F", &log);

    let mut registry = StageRegistry::new("broken");
    registry
        .register(StageSpec::synchronous("F", f.clone()).with_predecessor("G"))
        .unwrap();
    let err = registry.build().unwrap_err();

    assert_eq!(
        err,
        GraphError::UnknownPredecessor {
            stage: "F".to_string(),
            missing: "G".to_string()
        }
    );
    assert!(err.to_string().contains("'G'"));
    assert_eq!(f.call_count(), 0);
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_failure_is_isolated_to_descendants() {
    let log = ExecutionLog::new();
    let failing = Arc::new(FailingStage::new("B", "model did not converge"));
    let d = recording("D", &log);
    let graph = PipelineBuilder::new("isolation")
        .stage("A", recording("A", &log), &[])
        .stage("B", failing.clone(), &["A"])
        .stage("C", recording("C", &log), &["A"])
        .stage("D", d.clone(), &["B"])
        .stage("E", recording("E", &log), &["C"])
        .stage("F", recording("F", &log), &["D", "E"])
        .build()
        .unwrap();

    for config in [EngineConfig::new(), EngineConfig::sequential()] {
        let harness = TestHarness::new().with_config(config);
        let result = harness.run(&graph).await.unwrap();

        assert_stage_status(&result, "A", StageStatus::Succeeded);
        assert_stage_failed_with(&result, "B", "stage_execution");
        assert_stage_status(&result, "C", StageStatus::Succeeded);
        assert_stage_status(&result, "D", StageStatus::Skipped);
        assert_stage_status(&result, "E", StageStatus::Succeeded);
        assert_stage_status(&result, "F", StageStatus::Skipped);
        assert_eq!(result.skipped(), vec!["D", "F"]);
        assert!(harness.store.head("D/out").await.unwrap().is_none());
        assert!(harness.store.head("E/out").await.unwrap().is_some());
        assert_eq!(
            harness.sink.transitions_for("D"),
            vec!["stage.skipped".to_string()]
        );
    }

    assert_eq!(failing.call_count(), 2);
    assert_eq!(d.call_count(), 0);
}

#[tokio::test]
async fn test_artifacts_visible_to_dependents() {
    let producer = FnStage::new("train", |_| {
        Ok(Artifacts::from([
            ("model".to_string(), Bytes::from_static(b"weights-v1")),
            ("metrics".to_string(), Bytes::from(json!({"auc": 0.91}).to_string())),
        ]))
    });
    let consumer = FnStage::new("deploy", |inputs| {
        let model = inputs.require("train", "model")?;
        let metrics: serde_json::Value = inputs.json("train", "metrics")?;
        if model.as_ref() != b"weights-v1" || metrics["auc"] != json!(0.91) {
            return Err(crate::errors::StageError::new("unexpected inputs"));
        }
        Ok(Artifacts::from([("endpoint".to_string(), Bytes::from_static(b"http://model"))]))
    });
    let graph = PipelineBuilder::new("handoff")
        .stage("train", Arc::new(producer), &[])
        .stage("deploy", Arc::new(consumer), &["train"])
        .build()
        .unwrap();

    let harness = TestHarness::new();
    let result = harness.run(&graph).await.unwrap();

    assert_run_succeeded(&result);
    let keys: Vec<String> = harness
        .store
        .list("")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(keys, vec!["deploy/endpoint", "train/metrics", "train/model"]);
    assert_eq!(result.stage("train").unwrap().outputs.len(), 2);
}

/// Store whose reads always miss.
#[derive(Debug, Default)]
struct WriteOnlyStore {
    inner: InMemoryArtifactStore,
}

#[async_trait]
impl ArtifactStore for WriteOnlyStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<ArtifactMeta, StoreError> {
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        Err(StoreError::not_found(key))
    }

    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>, StoreError> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>, StoreError> {
        self.inner.list(prefix).await
    }
}

#[tokio::test]
async fn test_unreadable_input_is_artifact_missing() {
    let log = ExecutionLog::new();
    let b = recording("B", &log);
    let graph = PipelineBuilder::new("missing")
        .stage("A", recording("A", &log), &[])
        .stage("B", b.clone(), &["A"])
        .build()
        .unwrap();

    let result = crate::pipeline::ExecutionEngine::new(EngineConfig::new())
        .execute(
            &graph,
            Arc::new(WriteOnlyStore::default()),
            Arc::new(crate::observer::InMemoryEventSource::new()),
            Arc::new(crate::cancellation::CancellationToken::new()),
        )
        .await
        .unwrap();

    assert_stage_failed_with(&result, "B", "artifact_missing");
    assert_eq!(b.call_count(), 0);
}

#[test]
fn test_build_is_idempotent() {
    let log = ExecutionLog::new();
    let mut registry = StageRegistry::new("ml");
    for (name, preds) in [("D", vec!["B", "C"]), ("B", vec!["A"]), ("C", vec!["A"]), ("A", vec![])] {
        registry
            .register(StageSpec::synchronous(name, recording(name, &log)).with_predecessors(preds))
            .unwrap();
    }

    let first = registry.build().unwrap();
    let second = registry.build().unwrap();

    assert_eq!(first.execution_order(), second.execution_order());
    assert_eq!(first.edges(), second.edges());
    assert_eq!(first.execution_order(), &["A", "B", "C", "D"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_observer_and_dispatch() {
    let log = ExecutionLog::new();
    let config = ObserverConfig::new()
        .with_poll_interval(Duration::from_secs(2))
        .with_timeout(Duration::from_secs(600));
    let graph = PipelineBuilder::new("cancel")
        .stage("A", recording("A", &log), &[])
        .observer(
            "E",
            outlier_observer(Arc::new(CountingTrigger::new()), config),
            &["A"],
        )
        .stage("report", recording("report", &log), &["E"])
        .build()
        .unwrap();

    let harness = TestHarness::new();
    let cancel = harness.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel("operator abort");
    });

    let started = Instant::now();
    let result = harness.run(&graph).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_stage_status(&result, "A", StageStatus::Succeeded);
    assert_stage_status(&result, "E", StageStatus::Cancelled);
    assert_stage_status(&result, "report", StageStatus::Cancelled);
    assert!(result.failed().is_empty());
    assert_eq!(result.cancelled.as_deref(), Some("operator abort"));
    assert!(!log.contains("report"));
    assert_eq!(harness.store.get("A/out").await.unwrap().as_ref(), b"A-output");
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let log = ExecutionLog::new();
    let (graph, _) = diamond(&log);
    let harness = TestHarness::new();
    harness.cancel.cancel("shutdown");

    let result = harness.run(&graph).await.unwrap();

    assert_eq!(result.cancelled_stages(), vec!["A", "B", "C", "D"]);
    assert!(log.is_empty());
    assert_eq!(result.summary().cancelled, 4);
}

#[tokio::test]
async fn test_lifecycle_events_published() {
    let log = ExecutionLog::new();
    let (graph, _) = diamond(&log);
    let harness = TestHarness::new().with_config(EngineConfig::new().with_run_id("run-42"));

    harness.run(&graph).await.unwrap();

    assert_eq!(
        harness.sink.transitions_for("B"),
        vec!["stage.running".to_string(), "stage.succeeded".to_string()]
    );
    assert_eq!(harness.sink.events_of_type("run.").len(), 2);
    assert!(harness
        .sink
        .events()
        .iter()
        .all(|e| e.data.get("run_id") == Some(&json!("run-42"))));
}

#[tokio::test]
async fn test_run_recorded_in_ledger() {
    let log = ExecutionLog::new();
    let (graph, _) = diamond(&log);
    let ledger = Arc::new(InMemoryRunLedger::new());
    let harness = TestHarness::new();

    let result = harness
        .engine()
        .with_ledger(ledger.clone())
        .execute(
            &graph,
            harness.store.clone(),
            harness.events.clone(),
            harness.cancel.clone(),
        )
        .await
        .unwrap();

    assert_eq!(ledger.load(&result.run_id).await.unwrap(), result);
    assert_eq!(ledger.list().await.unwrap(), vec![result.run_id.clone()]);
}

#[tokio::test]
async fn test_diamond_on_filesystem_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FsArtifactStore::new(StoreConfig::new(dir.path())).await.unwrap());
    let log = ExecutionLog::new();
    let (graph, d) = diamond(&log);

    let result = crate::pipeline::ExecutionEngine::new(EngineConfig::new())
        .execute(
            &graph,
            store.clone(),
            Arc::new(crate::observer::InMemoryEventSource::new()),
            Arc::new(crate::cancellation::CancellationToken::new()),
        )
        .await
        .unwrap();

    assert_run_succeeded(&result);
    assert_eq!(store.list("").await.unwrap().len(), 4);
    assert_eq!(
        d.last_inputs().unwrap().require("C", "out").unwrap().as_ref(),
        b"C-output"
    );
}
