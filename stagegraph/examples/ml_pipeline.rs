//! A small training pipeline with an asynchronous deployment observer.
//!
//! `prep -> train -> deploy (observer) -> report`
//!
//! The deploy trigger schedules a "deployed" record on the in-memory event
//! source; the observer waits for it and hands it to `report`.
//!
//! Run with `cargo run --example ml_pipeline`.

use bytes::Bytes;
use serde_json::json;
use stagegraph::observability::{init_logging, LogFormat};
use stagegraph::prelude::*;
use stagegraph::stages::AsyncFnStage;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogFormat::Pretty);

    let events = Arc::new(InMemoryEventSource::new());

    let prep = Arc::new(FnStage::new("prep", |_inputs: &StageInputs| {
        let mut out = Artifacts::new();
        out.insert("rows".to_string(), Bytes::from_static(b"[1,2,3,4]"));
        Ok(out)
    }));

    let train = Arc::new(FnStage::new("train", |inputs: &StageInputs| {
        let rows: Vec<u32> = inputs.json("prep", "rows")?;
        let weight = f64::from(rows.iter().sum::<u32>()) / rows.len() as f64;
        let mut out = Artifacts::new();
        out.insert("model".to_string(), Bytes::from(json!({ "weight": weight }).to_string()));
        Ok(out)
    }));

    let pending = Arc::clone(&events);
    let deploy = ObserverStage::new(
        Arc::new(FnTrigger::new(move || {
            let events = Arc::clone(&pending);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                events.push_json(json!({ "status": "deployed", "endpoint": "/v1/predict" }));
            });
            Ok(())
        })),
        predicates::field_equals("status", json!("deployed")),
    )
    .with_config(
        ObserverConfig::new()
            .with_poll_interval(Duration::from_millis(100))
            .with_timeout(Duration::from_secs(5)),
    );

    let report = Arc::new(AsyncFnStage::new("report", |inputs: StageInputs| async move {
        let record: EventRecord = inputs.json("deploy", stagegraph::pipeline::EVENT_OUTPUT)?;
        let endpoint = record
            .get("endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let mut out = Artifacts::new();
        out.insert("endpoint".to_string(), Bytes::from(endpoint));
        Ok::<_, StageError>(out)
    }));

    let graph = PipelineBuilder::new("ml")
        .stage("prep", prep, &[])
        .stage("train", train, &["prep"])
        .observer("deploy", deploy, &["train"])
        .stage("report", report, &["deploy"])
        .build()?;

    let store = Arc::new(InMemoryArtifactStore::new());
    let engine = ExecutionEngine::new(EngineConfig::default())
        .with_event_sink(Arc::new(LoggingEventSink::default()));
    let result = engine
        .execute(&graph, store.clone(), events, Arc::new(CancellationToken::new()))
        .await?;

    println!("run {} finished: {:?}", result.run_id, result.summary());
    for record in &result.stages {
        println!("  {:<8} {}", record.name, record.status);
    }

    let endpoint = store.get(&ArtifactKey::new("report", "endpoint").to_store_key()).await?;
    println!("deployed at {}", String::from_utf8_lossy(&endpoint));
    Ok(())
}
