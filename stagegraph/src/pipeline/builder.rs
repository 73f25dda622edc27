//! Graph validation and the fluent pipeline builder.

use std::collections::HashMap;
use std::sync::Arc;

use super::{StageGraph, StageSpec};
use crate::errors::{CycleDetectedError, GraphError};
use crate::stages::{ObserverStage, Stage};

/// Compiles stage specifications into a [`StageGraph`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder;

/// DFS marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

impl GraphBuilder {
    /// Validates `stages` and computes a deterministic topological order.
    ///
    /// Checks run in this order, each over stages in registration order:
    /// non-empty, unique names, every predecessor registered, no cycles.
    /// The returned order is the DFS post-order over predecessors, starting
    /// from each stage in registration order, so the same input always
    /// yields the same graph.
    ///
    /// # Errors
    ///
    /// * `GraphError::EmptyGraph` if `stages` is empty.
    /// * `GraphError::DuplicateStage` if two stages share a name.
    /// * `GraphError::UnknownPredecessor` for the first unresolved name.
    /// * `GraphError::CycleDetected` with the cycle's stage sequence.
    pub fn build(name: &str, stages: Vec<StageSpec>) -> Result<StageGraph, GraphError> {
        if stages.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(stages.len());
        for (i, spec) in stages.iter().enumerate() {
            if index.insert(spec.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateStage {
                    stage: spec.name.clone(),
                });
            }
        }

        for spec in &stages {
            if let Some(missing) = spec.predecessors.iter().find(|p| !index.contains_key(p.as_str())) {
                return Err(GraphError::UnknownPredecessor {
                    stage: spec.name.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let order = topological_order(&stages, &index)?;
        drop(index);

        tracing::debug!(pipeline = name, stages = stages.len(), "Built stage graph");
        Ok(StageGraph::new(name.to_string(), stages, &order))
    }
}

/// Three-colour DFS over predecessor edges; returns stage indices in post-order.
///
/// The walk keeps its own stack of `(stage, next predecessor)` frames, so
/// chain depth is bounded by memory rather than the thread stack.
fn topological_order(
    stages: &[StageSpec],
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, CycleDetectedError> {
    let mut marks = vec![Mark::White; stages.len()];
    let mut order = Vec::with_capacity(stages.len());
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..stages.len() {
        if marks[root] != Mark::White {
            continue;
        }
        marks[root] = Mark::Gray;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            let Some(pred) = stages[node].predecessors.get(cursor) else {
                stack.pop();
                marks[node] = Mark::Black;
                order.push(node);
                continue;
            };
            frame.1 += 1;

            // Resolution was checked before the walk.
            let Some(&next) = index.get(pred.as_str()) else {
                continue;
            };
            match marks[next] {
                Mark::White => {
                    marks[next] = Mark::Gray;
                    stack.push((next, 0));
                }
                Mark::Gray => {
                    let path: Vec<usize> = stack.iter().map(|&(n, _)| n).collect();
                    return Err(cycle_error(stages, &path, next));
                }
                Mark::Black => {}
            }
        }
    }

    Ok(order)
}

/// Builds the cycle in dependency direction, closing it on its first stage.
fn cycle_error(stages: &[StageSpec], path: &[usize], back_to: usize) -> CycleDetectedError {
    let start = path.iter().position(|&n| n == back_to).unwrap_or(0);
    // The DFS walks predecessor edges, so reverse to read "a -> b" as "a feeds b".
    let mut cycle: Vec<String> = path[start..]
        .iter()
        .rev()
        .map(|&n| stages[n].name.clone())
        .collect();
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    CycleDetectedError::new(cycle)
}

/// Fluent builder assembling a graph stage by stage.
///
/// Validation is deferred to [`PipelineBuilder::build`], so stages may be
/// added in any order.
///
/// ```rust,ignore
/// let graph = PipelineBuilder::new("ml")
///     .stage("prep", prep, &[])
///     .stage("train", train, &["prep"])
///     .observer("detect", detector, &["train"])
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a synchronous stage.
    #[must_use]
    pub fn stage(self, name: impl Into<String>, stage: Arc<dyn Stage>, predecessors: &[&str]) -> Self {
        self.spec(StageSpec::synchronous(name, stage).with_predecessors(predecessors.iter().copied()))
    }

    /// Adds an asynchronous observer stage.
    #[must_use]
    pub fn observer(
        self,
        name: impl Into<String>,
        observer: ObserverStage,
        predecessors: &[&str],
    ) -> Self {
        self.spec(StageSpec::observer(name, observer).with_predecessors(predecessors.iter().copied()))
    }

    /// Adds a prepared specification.
    #[must_use]
    pub fn spec(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// See [`GraphBuilder::build`].
    pub fn build(self) -> Result<StageGraph, GraphError> {
        GraphBuilder::build(&self.name, self.stages)
    }
}
