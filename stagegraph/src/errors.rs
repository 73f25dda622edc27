//! Error types for the stagegraph engine.
//!
//! Errors are split by layer: graph construction ([`GraphError`]), per-stage
//! runtime failures recorded in a run ([`StageFailure`]), and the narrow
//! collaborator interfaces (store, event source, trigger, ledger).
//! [`StagegraphError`] aggregates them for callers that want a single type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::core::StageStatus;

/// The main error type for stagegraph operations.
#[derive(Debug, Error)]
pub enum StagegraphError {
    /// The stage graph could not be built.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// An artifact store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Observing an external event failed.
    #[error("{0}")]
    Observe(#[from] ObserveError),

    /// The run ledger could not be read or written.
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    /// A stage was asked to move to a status its current status cannot reach.
    #[error("Illegal status transition for stage '{stage}': {from} -> {to}")]
    InvalidTransition {
        /// The stage name.
        stage: String,
        /// The current status.
        from: StageStatus,
        /// The requested status.
        to: StageStatus,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in stage graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle; the first stage is repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }

    /// Returns true if `stage` lies on the cycle.
    #[must_use]
    pub fn involves(&self, stage: &str) -> bool {
        self.cycle_path.iter().any(|s| s == stage)
    }
}

/// Build-time errors. Both kinds are fatal: no run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A stage names a predecessor that was never registered.
    #[error("Stage '{stage}' depends on unknown stage '{missing}'")]
    UnknownPredecessor {
        /// The stage declaring the dependency.
        stage: String,
        /// The unresolved predecessor name.
        missing: String,
    },

    /// The declared dependencies contain a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// Two stages were registered under the same name.
    #[error("Stage '{stage}' is registered more than once")]
    DuplicateStage {
        /// The duplicated name.
        stage: String,
    },

    /// The graph has no stages.
    #[error("Stage graph has no stages")]
    EmptyGraph,
}

impl GraphError {
    /// Returns the stages involved in the error.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        match self {
            Self::UnknownPredecessor { stage, missing } => vec![stage.clone(), missing.clone()],
            Self::CycleDetected(err) => err.cycle_path.clone(),
            Self::DuplicateStage { stage } => vec![stage.clone()],
            Self::EmptyGraph => Vec::new(),
        }
    }

    /// Returns diagnostic metadata for the error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::UnknownPredecessor { stage, missing } => ContractErrorInfo::new(
                "GRAPH-MISSING-PRED",
                format!("Predecessor '{missing}' not found"),
            )
            .with_fix_hint("Register the predecessor stage or fix the typo in the stage name.")
            .with_context_entry("stage", stage.as_str())
            .with_context_entry("missing", missing.as_str()),
            Self::CycleDetected(err) => ContractErrorInfo::new(
                "GRAPH-CYCLE",
                format!("Stage graph contains a dependency cycle: {}", err.cycle_path.join(" -> ")),
            )
            .with_fix_hint("Remove one of the dependencies in the cycle to break it."),
            Self::DuplicateStage { stage } => ContractErrorInfo::new(
                "GRAPH-DUPLICATE",
                format!("Stage '{stage}' defined twice"),
            )
            .with_fix_hint("Stage names are identities; rename one of the stages."),
            Self::EmptyGraph => ContractErrorInfo::new("GRAPH-EMPTY", "Cannot build an empty graph")
                .with_fix_hint("Register at least one stage before building."),
        }
    }
}

/// A runtime failure attributed to exactly one stage.
///
/// Recorded in the run result; serializable so the run ledger can persist it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    /// The stage's executable unit reported an error.
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution {
        /// The stage name.
        stage: String,
        /// The unit's error message.
        message: String,
    },

    /// An observer stage exceeded its wait budget.
    #[error("Stage '{stage}' timed out after {polls} polls ({elapsed_ms} ms)")]
    ObserveTimeout {
        /// The stage name.
        stage: String,
        /// Number of polls attempted.
        polls: u32,
        /// Elapsed time in milliseconds.
        elapsed_ms: u64,
    },

    /// A predecessor's published artifact could not be read.
    #[error("Stage '{stage}' is missing input artifact '{key}'")]
    ArtifactMissing {
        /// The stage name.
        stage: String,
        /// The missing store key.
        key: String,
    },

    /// The observer stage's trigger call failed.
    #[error("Trigger for stage '{stage}' failed: {message}")]
    Trigger {
        /// The stage name.
        stage: String,
        /// The trigger's error message.
        message: String,
    },

    /// The event source could not be read.
    #[error("Event source failed for stage '{stage}': {message}")]
    EventSource {
        /// The stage name.
        stage: String,
        /// The source's error message.
        message: String,
    },

    /// Writing or reading an artifact failed.
    #[error("Artifact store failed for stage '{stage}': {message}")]
    Store {
        /// The stage name.
        stage: String,
        /// The store's error message.
        message: String,
    },

    /// The run was cancelled before or while the stage ran.
    #[error("Stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The stage name.
        stage: String,
        /// The cancellation reason.
        reason: String,
    },
}

impl StageFailure {
    /// Returns the stage the failure is attributed to.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::StageExecution { stage, .. }
            | Self::ObserveTimeout { stage, .. }
            | Self::ArtifactMissing { stage, .. }
            | Self::Trigger { stage, .. }
            | Self::EventSource { stage, .. }
            | Self::Store { stage, .. }
            | Self::Cancelled { stage, .. } => stage,
        }
    }

    /// Returns a short machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StageExecution { .. } => "stage_execution",
            Self::ObserveTimeout { .. } => "observe_timeout",
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::Trigger { .. } => "trigger",
            Self::EventSource { .. } => "event_source",
            Self::Store { .. } => "store",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Returns true if this failure represents cancellation rather than an error.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Error reported by a stage's executable unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageError {
    /// The error message.
    pub message: String,
    /// Whether a stage-level retry wrapper may try again.
    pub retryable: bool,
}

impl StageError {
    /// Creates a permanent stage error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable stage error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Errors from an artifact store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No artifact exists under the key.
    #[error("Artifact not found: {key}")]
    NotFound {
        /// The requested key.
        key: String,
    },

    /// The key cannot be mapped onto the backend.
    #[error("Invalid artifact key '{key}': {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Stored content does not match its recorded digest.
    #[error("Corrupt artifact '{key}': expected digest {expected}, found {actual}")]
    Corrupt {
        /// The key read.
        key: String,
        /// Digest recorded in the ref.
        expected: String,
        /// Digest of the bytes found.
        actual: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns true if the error is a missing key.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from an event source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The records could not be fetched.
    #[error("Event fetch failed: {0}")]
    Fetch(String),

    /// The cursor handed back is not one this source produced.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// A line-matching pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Errors from a trigger invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    /// The call failed.
    #[error("Trigger failed: {0}")]
    Failed(String),

    /// The remote endpoint answered with a non-success status.
    #[error("Trigger endpoint {url} returned status {status}")]
    Status {
        /// The endpoint.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
}

/// Errors from the event observer.
#[derive(Debug, Error)]
pub enum ObserveError {
    /// No matching record arrived within the wait budget.
    #[error("No matching event after {polls} polls ({elapsed:?})")]
    Timeout {
        /// Number of polls attempted.
        polls: u32,
        /// Wall-clock time since the first poll.
        elapsed: Duration,
    },

    /// The run was cancelled while waiting.
    #[error("Observation cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// The event source failed.
    #[error("{0}")]
    Source(#[from] SourceError),

    /// Re-firing the trigger failed.
    #[error("{0}")]
    Trigger(#[from] TriggerError),
}

/// Errors from the run ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No run recorded under the id.
    #[error("Run not found: {run_id}")]
    NotFound {
        /// The requested run id.
        run_id: String,
    },

    /// The run id cannot be used as a ledger key.
    #[error("Invalid run id: '{run_id}'")]
    InvalidRunId {
        /// The rejected run id.
        run_id: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert!(err.involves("b"));
        assert!(!err.involves("d"));
    }

    #[test]
    fn test_unknown_predecessor_names_both_stages() {
        let err = GraphError::UnknownPredecessor {
            stage: "F".to_string(),
            missing: "G".to_string(),
        };

        assert_eq!(err.to_string(), "Stage 'F' depends on unknown stage 'G'");
        assert_eq!(err.stages(), vec!["F".to_string(), "G".to_string()]);
        let info = err.error_info();
        assert_eq!(info.code, "GRAPH-MISSING-PRED");
        assert_eq!(info.context.get("missing"), Some(&"G".to_string()));
    }

    #[test]
    fn test_graph_error_codes() {
        let cycle = GraphError::from(CycleDetectedError::new(vec!["x".into(), "x".into()]));
        assert_eq!(cycle.error_info().code, "GRAPH-CYCLE");
        assert_eq!(GraphError::EmptyGraph.error_info().code, "GRAPH-EMPTY");
    }

    #[test]
    fn test_stage_failure_round_trips_through_json() {
        let failure = StageFailure::ObserveTimeout {
            stage: "detect".to_string(),
            polls: 11,
            elapsed_ms: 20_000,
        };

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "observe_timeout");

        let back: StageFailure = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
        assert_eq!(back.stage(), "detect");
    }

    #[test]
    fn test_stage_error_from_anyhow_keeps_context() {
        let err: StageError = anyhow::anyhow!("disk full")
            .context("writing model")
            .into();
        assert_eq!(err.message, "writing model: disk full");
        assert!(!err.retryable);
    }

    #[test]
    fn test_cancellation_is_distinct() {
        let cancelled = StageFailure::Cancelled {
            stage: "s".to_string(),
            reason: "user".to_string(),
        };
        assert!(cancelled.is_cancellation());
        assert_eq!(cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_source_error_from_bad_pattern() {
        let err: SourceError = regex::Regex::new("(unclosed").unwrap_err().into();

        assert!(matches!(err, SourceError::Pattern(_)));
        assert!(err.to_string().starts_with("Invalid pattern:"));
        assert_eq!(err.clone(), err);
    }
}
