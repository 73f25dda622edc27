//! Test fixtures for running graphs.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::errors::StagegraphError;
use crate::events::CollectingEventSink;
use crate::observability::init_test_logging;
use crate::observer::{EventSource, InMemoryEventSource};
use crate::pipeline::{EngineConfig, ExecutionEngine, RunResult, StageGraph};
use crate::store::InMemoryArtifactStore;

/// In-memory collaborators wired to an engine.
///
/// ```rust,ignore
/// let harness = TestHarness::new();
/// harness.events.push_json(json!({"is_outlier": [1]}));
/// let result = harness.run(&graph).await?;
/// ```
pub struct TestHarness {
    /// The artifact store stages publish into.
    pub store: Arc<InMemoryArtifactStore>,
    /// The default event source.
    pub events: Arc<InMemoryEventSource>,
    /// The run's cancellation token.
    pub cancel: Arc<CancellationToken>,
    /// Receives every lifecycle event.
    pub sink: Arc<CollectingEventSink>,
    config: EngineConfig,
    source: Option<Arc<dyn EventSource>>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness with fresh in-memory collaborators.
    #[must_use]
    pub fn new() -> Self {
        init_test_logging();
        Self {
            store: Arc::new(InMemoryArtifactStore::new()),
            events: Arc::new(InMemoryEventSource::new()),
            cancel: Arc::new(CancellationToken::new()),
            sink: Arc::new(CollectingEventSink::new()),
            config: EngineConfig::default(),
            source: None,
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default event source.
    #[must_use]
    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Builds the engine the harness runs graphs with.
    #[must_use]
    pub fn engine(&self) -> ExecutionEngine {
        ExecutionEngine::new(self.config.clone()).with_event_sink(self.sink.clone())
    }

    /// Executes `graph` once.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn run(&self, graph: &StageGraph) -> Result<RunResult, StagegraphError> {
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| self.events.clone() as Arc<dyn EventSource>);
        self.engine()
            .execute(graph, self.store.clone(), source, Arc::clone(&self.cancel))
            .await
    }
}
