//! Per-run bookkeeping and the run result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::StageGraph;
use crate::core::{ArtifactKey, StageKind, StageStatus};
use crate::errors::{StageFailure, StagegraphError};
use crate::utils::{now_utc, Timestamp};

/// What happened to one stage during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage name.
    pub name: String,
    /// The stage kind.
    pub kind: StageKind,
    /// Final (or current) status.
    pub status: StageStatus,
    /// When the stage started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the stage reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    /// Why the stage failed or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
    /// Artifacts the stage published.
    #[serde(default)]
    pub outputs: Vec<ArtifactKey>,
}

impl StageRecord {
    fn pending(name: &str, kind: StageKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            outputs: Vec::new(),
        }
    }

    /// Returns the time spent running, if the stage ran to a terminal status.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}

/// Stage counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of stages.
    pub total: usize,
    /// Stages that succeeded.
    pub succeeded: usize,
    /// Stages that failed.
    pub failed: usize,
    /// Stages skipped because a predecessor did not succeed.
    pub skipped: usize,
    /// Stages cancelled.
    pub cancelled: usize,
    /// Stages that never reached a terminal status.
    pub pending: usize,
}

/// The outcome of executing a stage graph once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique id of this run.
    pub run_id: String,
    /// The pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub ended_at: Timestamp,
    /// Per-stage records in execution order.
    pub stages: Vec<StageRecord>,
    /// Stage names in the order they reached a terminal status.
    pub order_of_completion: Vec<String>,
    /// Cancellation reason, if the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<String>,
}

impl RunResult {
    /// Returns true only if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Succeeded)
    }

    /// Returns the record of `stage`.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == stage)
    }

    /// Returns the status of `stage`.
    #[must_use]
    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.stage(stage).map(|s| s.status)
    }

    /// Returns the records of failed stages.
    #[must_use]
    pub fn failed(&self) -> Vec<&StageRecord> {
        self.with_status(StageStatus::Failed).collect()
    }

    /// Returns the names of skipped stages.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.with_status(StageStatus::Skipped)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Returns the names of cancelled stages.
    #[must_use]
    pub fn cancelled_stages(&self) -> Vec<&str> {
        self.with_status(StageStatus::Cancelled)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Counts stages per status.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.stages.len(),
            ..RunSummary::default()
        };
        for record in &self.stages {
            match record.status {
                StageStatus::Succeeded => summary.succeeded += 1,
                StageStatus::Failed => summary.failed += 1,
                StageStatus::Skipped => summary.skipped += 1,
                StageStatus::Cancelled => summary.cancelled += 1,
                StageStatus::Pending | StageStatus::Running => summary.pending += 1,
            }
        }
        summary
    }

    /// Returns the wall-clock duration of the run.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    fn with_status(&self, status: StageStatus) -> impl Iterator<Item = &StageRecord> {
        self.stages.iter().filter(move |s| s.status == status)
    }
}

/// Mutable run state owned by the engine while a run is in progress.
///
/// Every status change goes through [`RunState::transition`], which refuses
/// moves the stage state machine does not allow.
#[derive(Debug)]
pub(crate) struct RunState {
    run_id: String,
    pipeline: String,
    started_at: Timestamp,
    records: Vec<StageRecord>,
    index: HashMap<String, usize>,
    order_of_completion: Vec<String>,
}

impl RunState {
    pub(crate) fn new(run_id: String, graph: &StageGraph) -> Self {
        let records: Vec<StageRecord> = graph
            .stages()
            .iter()
            .map(|s| StageRecord::pending(&s.name, s.kind()))
            .collect();
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();

        Self {
            run_id,
            pipeline: graph.name().to_string(),
            started_at: now_utc(),
            records,
            index,
            order_of_completion: Vec::new(),
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) fn status(&self, stage: &str) -> Option<StageStatus> {
        self.index.get(stage).map(|&i| self.records[i].status)
    }

    /// Moves `stage` to `to`, stamping start and end times.
    pub(crate) fn transition(&mut self, stage: &str, to: StageStatus) -> Result<(), StagegraphError> {
        let idx = *self
            .index
            .get(stage)
            .ok_or_else(|| StagegraphError::Internal(format!("unknown stage '{stage}' in run")))?;
        let record = &mut self.records[idx];

        if !record.status.can_transition_to(to) {
            return Err(StagegraphError::InvalidTransition {
                stage: stage.to_string(),
                from: record.status,
                to,
            });
        }

        let now = now_utc();
        if to == StageStatus::Running {
            record.started_at = Some(now);
        }
        if to.is_terminal() {
            record.ended_at = Some(now);
            self.order_of_completion.push(stage.to_string());
        }
        record.status = to;
        Ok(())
    }

    /// Marks `stage` succeeded with its published outputs.
    pub(crate) fn succeed(&mut self, stage: &str, outputs: Vec<ArtifactKey>) -> Result<(), StagegraphError> {
        self.transition(stage, StageStatus::Succeeded)?;
        if let Some(&idx) = self.index.get(stage) {
            self.records[idx].outputs = outputs;
        }
        Ok(())
    }

    /// Moves `stage` to `to` and records why.
    pub(crate) fn fail(
        &mut self,
        stage: &str,
        to: StageStatus,
        failure: StageFailure,
    ) -> Result<(), StagegraphError> {
        self.transition(stage, to)?;
        if let Some(&idx) = self.index.get(stage) {
            self.records[idx].error = Some(failure);
        }
        Ok(())
    }

    /// Stages still pending, in execution order.
    pub(crate) fn pending(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == StageStatus::Pending)
            .map(|r| r.name.clone())
            .collect()
    }

    pub(crate) fn finish(self, cancelled: Option<String>) -> RunResult {
        RunResult {
            run_id: self.run_id,
            pipeline: self.pipeline,
            started_at: self.started_at,
            ended_at: now_utc(),
            stages: self.records,
            order_of_completion: self.order_of_completion,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::NoOpStage;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn graph() -> StageGraph {
        PipelineBuilder::new("p")
            .stage("a", Arc::new(NoOpStage::new("a")), &[])
            .stage("b", Arc::new(NoOpStage::new("b")), &["a"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_legal_transitions() {
        let mut state = RunState::new("r1".to_string(), &graph());
        state.transition("a", StageStatus::Running).unwrap();
        state.succeed("a", vec![ArtifactKey::new("a", "out")]).unwrap();
        state.transition("b", StageStatus::Skipped).unwrap();

        let result = state.finish(None);
        assert_eq!(result.order_of_completion, vec!["a", "b"]);
        assert_eq!(result.stage("a").unwrap().outputs, vec![ArtifactKey::new("a", "out")]);
        assert!(result.stage("a").unwrap().duration().is_some());
        assert!(result.stage("b").unwrap().started_at.is_none());
    }

    #[test]
    fn test_illegal_transition_refused() {
        let mut state = RunState::new("r1".to_string(), &graph());
        let err = state.transition("a", StageStatus::Succeeded).unwrap_err();
        assert!(matches!(
            err,
            StagegraphError::InvalidTransition {
                from: StageStatus::Pending,
                to: StageStatus::Succeeded,
                ..
            }
        ));

        state.transition("a", StageStatus::Running).unwrap();
        state.transition("a", StageStatus::Succeeded).unwrap();
        assert!(state.transition("a", StageStatus::Running).is_err());
    }

    #[test]
    fn test_summary_and_queries() {
        let mut state = RunState::new("r1".to_string(), &graph());
        state.transition("a", StageStatus::Running).unwrap();
        state
            .fail(
                "a",
                StageStatus::Failed,
                StageFailure::StageExecution {
                    stage: "a".to_string(),
                    message: "boom".to_string(),
                },
            )
            .unwrap();
        state.transition("b", StageStatus::Skipped).unwrap();
        let result = state.finish(None);

        assert!(!result.is_success());
        assert_eq!(result.failed().len(), 1);
        assert_eq!(result.skipped(), vec!["b"]);
        assert_eq!(result.status("a"), Some(StageStatus::Failed));
        assert_eq!(
            result.summary(),
            RunSummary {
                total: 2,
                failed: 1,
                skipped: 1,
                ..RunSummary::default()
            }
        );
    }

    #[test]
    fn test_run_result_json_roundtrip() {
        let mut state = RunState::new("r1".to_string(), &graph());
        state.transition("a", StageStatus::Running).unwrap();
        state
            .fail(
                "a",
                StageStatus::Cancelled,
                StageFailure::Cancelled {
                    stage: "a".to_string(),
                    reason: "stop".to_string(),
                },
            )
            .unwrap();
        state.transition("b", StageStatus::Cancelled).unwrap();
        let result = state.finish(Some("stop".to_string()));

        let json = serde_json::to_string(&result).unwrap();
        let back: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.cancelled_stages(), vec!["a", "b"]);
    }
}
