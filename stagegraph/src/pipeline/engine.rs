//! The execution engine.
//!
//! Runs a [`StageGraph`] once: stages start as soon as every predecessor has
//! succeeded, artifacts are handed over through an [`ArtifactStore`], and
//! observer stages wait on an [`EventSource`]. A failing stage only takes its
//! own descendants down; independent branches keep running.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::Instrument;

use super::{EngineConfig, ExecutionMode, RunLedger, RunResult, StageGraph, StageRunner, StageSpec};
use super::run::RunState;
use crate::cancellation::CancellationToken;
use crate::core::{ArtifactKey, Artifacts, StageEvent, StageInputs, StageStatus};
use crate::errors::{ObserveError, StageFailure, StagegraphError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::{run_span, stage_span, SpanTimer};
use crate::observer::{EventObserver, EventSource};
use crate::stages::ObserverStage;
use crate::store::{validate_key, ArtifactStore};
use crate::utils::generate_run_id;

/// Output name under which an observer stage publishes the matching record.
pub const EVENT_OUTPUT: &str = "event";

type StageResult = Result<Vec<ArtifactKey>, StageFailure>;

/// Executes stage graphs.
///
/// The engine is stateless between runs; the same engine (and graph) can be
/// executed any number of times.
#[derive(Clone)]
pub struct ExecutionEngine {
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
    ledger: Option<Arc<dyn RunLedger>>,
}

impl ExecutionEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sink: Arc::new(NoOpEventSink),
            ledger: None,
        }
    }

    /// Publishes status transitions to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Records every finished run in `ledger`.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every stage of `graph` once.
    ///
    /// Stage failures do not make this call fail; they are reported per stage
    /// in the returned [`RunResult`].
    ///
    /// # Errors
    ///
    /// Returns `StagegraphError::InvalidTransition` or `Internal` if run
    /// bookkeeping is violated, and `StagegraphError::Ledger` if the finished
    /// run cannot be recorded.
    pub async fn execute(
        &self,
        graph: &StageGraph,
        store: Arc<dyn ArtifactStore>,
        events: Arc<dyn EventSource>,
        cancel: Arc<CancellationToken>,
    ) -> Result<RunResult, StagegraphError> {
        let run_id = self.config.run_id.clone().unwrap_or_else(generate_run_id);
        let span = run_span(&run_id, graph.name());

        async move {
            let timer = SpanTimer::start("run");
            let ctx = Arc::new(RunContext {
                store,
                observer: EventObserver::new(events),
                cancel,
                written: Mutex::new(HashSet::new()),
            });
            let mut run = Run::new(graph, run_id, ctx, Arc::clone(&self.sink));

            tracing::info!(
                stages = graph.stage_count(),
                mode = %self.config.mode,
                "Run started"
            );
            self.sink
                .emit(StageEvent::run_started(run.state.run_id(), graph.name(), graph.stage_count()))
                .await;

            match self.config.mode {
                ExecutionMode::Concurrent => run.drive_concurrent(self.config.concurrency_limit()).await?,
                ExecutionMode::Sequential => run.drive_sequential().await?,
            }

            let result = run.finish().await?;
            let duration_ms = timer.finish();
            let summary = result.summary();
            tracing::info!(
                success = result.is_success(),
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                cancelled = summary.cancelled,
                duration_ms,
                "Run completed"
            );
            self.sink
                .emit(StageEvent::run_completed(
                    &result.run_id,
                    result.is_success(),
                    duration_ms,
                ))
                .await;

            if let Some(ledger) = &self.ledger {
                ledger.record(&result).await?;
            }
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("ledger", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

/// Collaborators shared by every stage task of one run.
struct RunContext {
    store: Arc<dyn ArtifactStore>,
    observer: EventObserver,
    cancel: Arc<CancellationToken>,
    /// Store keys written during this run.
    written: Mutex<HashSet<String>>,
}

impl RunContext {
    /// Writes a stage's outputs; each key may be written once per run.
    ///
    /// All outputs are checked before the first write. If a write fails, the
    /// keys this call already wrote are deleted again, so a failed stage
    /// leaves no artifacts behind.
    async fn publish(&self, stage: &str, outputs: Artifacts) -> StageResult {
        let store_failure = |message: String| StageFailure::Store {
            stage: stage.to_string(),
            message,
        };

        let mut pending = Vec::with_capacity(outputs.len());
        for (output, data) in outputs {
            let key = ArtifactKey::new(stage, output);
            let store_key = key.to_store_key();
            validate_key(&store_key).map_err(|e| store_failure(e.to_string()))?;
            pending.push((key, store_key, data));
        }

        {
            let mut written = self.written.lock();
            if let Some((_, taken, _)) = pending.iter().find(|(_, k, _)| written.contains(k)) {
                return Err(store_failure(format!(
                    "artifact '{taken}' was already written in this run"
                )));
            }
            written.extend(pending.iter().map(|(_, k, _)| k.clone()));
        }

        let mut keys = Vec::with_capacity(pending.len());
        let mut stored: Vec<String> = Vec::with_capacity(pending.len());
        let mut failure = None;
        for (key, store_key, data) in &pending {
            match self.store.put(store_key, data.clone()).await {
                Ok(meta) => {
                    tracing::debug!(key = %store_key, digest = %meta.digest, size = meta.size, "Published artifact");
                    stored.push(store_key.clone());
                    keys.push(key.clone());
                }
                Err(e) => {
                    failure = Some(store_failure(e.to_string()));
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            return Ok(keys);
        };

        for store_key in &stored {
            if let Err(e) = self.store.delete(store_key).await {
                tracing::warn!(key = %store_key, error = %e, "Failed to roll back artifact");
            }
        }
        let mut written = self.written.lock();
        for (_, store_key, _) in &pending {
            written.remove(store_key);
        }
        Err(failure)
    }

    fn cancelled(&self, stage: &str) -> StageFailure {
        StageFailure::Cancelled {
            stage: stage.to_string(),
            reason: self.cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        }
    }
}

/// Everything one stage task needs, owned so it can be spawned.
struct StageJob {
    spec: StageSpec,
    /// Artifacts published by each predecessor, in declaration order.
    inputs: Vec<(String, Vec<ArtifactKey>)>,
    ctx: Arc<RunContext>,
}

impl StageJob {
    async fn run(self) -> StageResult {
        let timer = SpanTimer::start(&self.spec.name);
        let result = match &self.spec.runner {
            StageRunner::Synchronous(stage) => {
                let inputs = self.load_inputs().await?;
                let outputs = stage.run(&inputs).await.map_err(|e| StageFailure::StageExecution {
                    stage: self.spec.name.clone(),
                    message: e.to_string(),
                })?;
                self.ctx.publish(&self.spec.name, outputs).await
            }
            StageRunner::AsyncObserver(observer) => self.observe(observer).await,
        };
        tracing::debug!(duration_ms = timer.finish(), ok = result.is_ok(), "Stage finished");
        result
    }

    async fn load_inputs(&self) -> Result<StageInputs, StageFailure> {
        let mut inputs = StageInputs::new(&self.spec.name);
        for (predecessor, keys) in &self.inputs {
            let mut artifacts = Artifacts::new();
            for key in keys {
                let store_key = key.to_store_key();
                let data = self.ctx.store.get(&store_key).await.map_err(|e| {
                    tracing::warn!(key = %store_key, error = %e, "Input artifact unreadable");
                    StageFailure::ArtifactMissing {
                        stage: self.spec.name.clone(),
                        key: store_key.clone(),
                    }
                })?;
                artifacts.insert(key.output.clone(), data);
            }
            inputs.insert(predecessor.clone(), artifacts);
        }
        Ok(inputs)
    }

    async fn observe(&self, observer: &ObserverStage) -> StageResult {
        let stage = self.spec.name.as_str();
        let ctx = &self.ctx;

        let fired = tokio::select! {
            fired = observer.trigger.fire() => fired,
            () = ctx.cancel.cancelled() => return Err(ctx.cancelled(stage)),
        };
        fired.map_err(|e| StageFailure::Trigger {
            stage: stage.to_string(),
            message: e.to_string(),
        })?;

        let retrigger = observer
            .config
            .retrigger_each_poll
            .then(|| observer.trigger.as_ref());
        let observed = ctx
            .observer
            .wait_for(
                &observer.predicate,
                observer.config.poll_interval(),
                observer.config.timeout(),
                retrigger,
                &ctx.cancel,
            )
            .await;

        match observed {
            Ok(event) => {
                tracing::info!(polls = event.polls, elapsed = ?event.elapsed, "Observed event");
                let body = serde_json::to_vec(&event.record).map_err(|e| StageFailure::Store {
                    stage: stage.to_string(),
                    message: e.to_string(),
                })?;
                let mut outputs = Artifacts::new();
                outputs.insert(EVENT_OUTPUT.to_string(), Bytes::from(body));
                ctx.publish(stage, outputs).await
            }
            Err(ObserveError::Timeout { polls, elapsed }) => Err(StageFailure::ObserveTimeout {
                stage: stage.to_string(),
                polls,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(ObserveError::Cancelled { reason }) => Err(StageFailure::Cancelled {
                stage: stage.to_string(),
                reason,
            }),
            Err(ObserveError::Source(e)) => Err(StageFailure::EventSource {
                stage: stage.to_string(),
                message: e.to_string(),
            }),
            Err(ObserveError::Trigger(e)) => Err(StageFailure::Trigger {
                stage: stage.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Coordinator state for one run. Only the coordinator touches it; stage
/// tasks report back through their join handles.
struct Run<'g> {
    graph: &'g StageGraph,
    state: RunState,
    /// Predecessors not yet succeeded, per stage.
    remaining: HashMap<String, usize>,
    /// Artifacts published by succeeded stages.
    published: HashMap<String, Vec<ArtifactKey>>,
    ctx: Arc<RunContext>,
    sink: Arc<dyn EventSink>,
}

impl<'g> Run<'g> {
    fn new(graph: &'g StageGraph, run_id: String, ctx: Arc<RunContext>, sink: Arc<dyn EventSink>) -> Self {
        let remaining = graph
            .stages()
            .iter()
            .map(|s| (s.name.clone(), s.predecessors.len()))
            .collect();

        Self {
            graph,
            state: RunState::new(run_id, graph),
            remaining,
            published: HashMap::new(),
            ctx,
            sink,
        }
    }

    /// Dispatches ready stages as tasks, up to `limit` at a time, and
    /// re-evaluates readiness on every completion.
    async fn drive_concurrent(&mut self, limit: usize) -> Result<(), StagegraphError> {
        let mut ready: VecDeque<String> = self.graph.roots().into_iter().map(String::from).collect();
        let mut active: FuturesUnordered<BoxFuture<'static, (String, Result<StageResult, JoinError>)>> =
            FuturesUnordered::new();

        loop {
            while active.len() < limit && !self.ctx.cancel.is_cancelled() {
                let Some(name) = ready.pop_front() else {
                    break;
                };
                let handle = tokio::spawn(self.dispatch(&name).await?);
                active.push(async move { (name, handle.await) }.boxed());
            }

            let Some((name, joined)) = active.next().await else {
                break;
            };
            let newly_ready = self.complete(&name, flatten_join(&name, joined)).await?;
            ready.extend(newly_ready);
        }

        Ok(())
    }

    /// Runs stages one at a time in execution order.
    async fn drive_sequential(&mut self) -> Result<(), StagegraphError> {
        let graph = self.graph;
        for name in graph.execution_order() {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            if self.state.status(name) != Some(StageStatus::Pending) {
                continue;
            }
            if self.remaining.get(name).copied().unwrap_or(0) > 0 {
                continue;
            }
            let joined = tokio::spawn(self.dispatch(name).await?).await;
            self.complete(name, flatten_join(name, joined)).await?;
        }
        Ok(())
    }

    /// Marks `name` running and returns its task.
    async fn dispatch(&mut self, name: &str) -> Result<BoxFuture<'static, StageResult>, StagegraphError> {
        let spec = self
            .graph
            .stage(name)
            .cloned()
            .ok_or_else(|| StagegraphError::Internal(format!("stage '{name}' missing from graph")))?;

        self.state.transition(name, StageStatus::Running)?;
        tracing::info!(stage = name, kind = %spec.kind(), "Stage running");
        self.emit(name, StageStatus::Running, None).await;

        let inputs = spec
            .predecessors
            .iter()
            .map(|p| (p.clone(), self.published.get(p).cloned().unwrap_or_default()))
            .collect();
        let span = stage_span(self.state.run_id(), name, spec.kind());
        let job = StageJob {
            spec,
            inputs,
            ctx: Arc::clone(&self.ctx),
        };
        Ok(job.run().instrument(span).boxed())
    }

    /// Records a finished stage and returns the dependents it made ready.
    async fn complete(&mut self, name: &str, result: StageResult) -> Result<Vec<String>, StagegraphError> {
        match result {
            Ok(keys) => {
                self.state.succeed(name, keys.clone())?;
                self.published.insert(name.to_string(), keys);
                tracing::info!(stage = name, "Stage succeeded");
                self.emit(name, StageStatus::Succeeded, None).await;

                let graph = self.graph;
                let mut newly_ready = Vec::new();
                for dependent in graph.dependents(name) {
                    if let Some(count) = self.remaining.get_mut(dependent) {
                        *count = count.saturating_sub(1);
                        if *count == 0 && self.state.status(dependent) == Some(StageStatus::Pending) {
                            newly_ready.push(dependent.clone());
                        }
                    }
                }
                Ok(newly_ready)
            }
            Err(failure) if failure.is_cancellation() => {
                tracing::warn!(stage = name, error = %failure, "Stage cancelled");
                self.state.fail(name, StageStatus::Cancelled, failure.clone())?;
                self.emit(name, StageStatus::Cancelled, Some(&failure)).await;
                Ok(Vec::new())
            }
            Err(failure) => {
                tracing::warn!(stage = name, kind = failure.kind(), error = %failure, "Stage failed");
                self.state.fail(name, StageStatus::Failed, failure.clone())?;
                self.emit(name, StageStatus::Failed, Some(&failure)).await;
                self.skip_descendants(name).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Skips every still-pending stage downstream of `failed`.
    async fn skip_descendants(&mut self, failed: &str) -> Result<(), StagegraphError> {
        for descendant in self.graph.descendants(failed) {
            if self.state.status(&descendant) == Some(StageStatus::Pending) {
                self.state.transition(&descendant, StageStatus::Skipped)?;
                tracing::info!(stage = %descendant, upstream = failed, "Stage skipped");
                self.emit(&descendant, StageStatus::Skipped, None).await;
            }
        }
        Ok(())
    }

    /// Settles stages that were never dispatched and builds the result.
    async fn finish(mut self) -> Result<RunResult, StagegraphError> {
        let reason = self
            .ctx
            .cancel
            .is_cancelled()
            .then(|| self.ctx.cancel.reason().unwrap_or_else(|| "cancelled".to_string()));

        let pending = self.state.pending();
        if !pending.is_empty() && reason.is_none() {
            return Err(StagegraphError::Internal(format!(
                "run ended with undispatched stages: {pending:?}"
            )));
        }

        for name in pending {
            let failure = self.ctx.cancelled(&name);
            self.state.fail(&name, StageStatus::Cancelled, failure.clone())?;
            tracing::info!(stage = %name, "Stage cancelled before dispatch");
            self.emit(&name, StageStatus::Cancelled, Some(&failure)).await;
        }

        Ok(self.state.finish(reason))
    }

    async fn emit(&self, stage: &str, status: StageStatus, failure: Option<&StageFailure>) {
        let mut event = StageEvent::transition(self.state.run_id(), stage, status);
        if let Some(failure) = failure {
            event = event
                .add_data("error", serde_json::json!(failure.to_string()))
                .add_data("error_kind", serde_json::json!(failure.kind()));
        }
        self.sink.emit(event).await;
    }
}

fn flatten_join(name: &str, joined: Result<StageResult, JoinError>) -> StageResult {
    joined.unwrap_or_else(|e| {
        Err(StageFailure::StageExecution {
            stage: name.to_string(),
            message: format!("stage task aborted: {e}"),
        })
    })
}
