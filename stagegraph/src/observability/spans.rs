//! Span constructors and timing.

use tokio::time::Instant;
use tracing::Span;

use crate::core::StageKind;

/// Creates the span wrapping one run of a stage graph.
#[must_use]
pub fn run_span(run_id: &str, pipeline: &str) -> Span {
    tracing::info_span!("run", run_id = run_id, pipeline = pipeline)
}

/// Creates the span wrapping one stage execution.
#[must_use]
pub fn stage_span(run_id: &str, stage: &str, kind: StageKind) -> Span {
    tracing::info_span!(
        "stage",
        run_id = run_id,
        stage = stage,
        kind = %kind,
    )
}

/// Simple span timing helper.
///
/// Uses the tokio clock so durations stay consistent with paused-time tests.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
