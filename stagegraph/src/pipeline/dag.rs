//! The immutable, validated stage graph.

use std::collections::{HashMap, HashSet};

use super::StageSpec;

/// A directed acyclic graph of stages, ready for execution.
///
/// Built only through [`super::GraphBuilder`], so every predecessor resolves
/// and there are no cycles. Stages are held in topological order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications in execution order.
    stages: Vec<StageSpec>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
    /// Stage name to position in `stages`.
    index: HashMap<String, usize>,
    /// Stage name to the stages consuming it, in execution order.
    dependents: HashMap<String, Vec<String>>,
}

impl StageGraph {
    /// Assembles a graph from validated stages and their topological order.
    pub(crate) fn new(name: String, stages: Vec<StageSpec>, order: &[usize]) -> Self {
        let mut slots: Vec<Option<StageSpec>> = stages.into_iter().map(Some).collect();
        let stages: Vec<StageSpec> = order.iter().filter_map(|&i| slots[i].take()).collect();

        let execution_order: Vec<String> = stages.iter().map(|s| s.name.clone()).collect();
        let index = execution_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut dependents: HashMap<String, Vec<String>> = execution_order
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for spec in &stages {
            for pred in &spec.predecessors {
                if let Some(list) = dependents.get_mut(pred) {
                    list.push(spec.name.clone());
                }
            }
        }

        Self {
            name,
            stages,
            execution_order,
            index,
            dependents,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has a stage called `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns the declared predecessors of `name`, or an empty slice if unknown.
    #[must_use]
    pub fn predecessors(&self, name: &str) -> &[String] {
        self.stage(name).map_or(&[][..], |s| s.predecessors.as_slice())
    }

    /// Returns the stages consuming `name`, in execution order.
    #[must_use]
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map_or(&[][..], Vec::as_slice)
    }

    /// Returns every stage reachable from `name` along dependency edges, in
    /// execution order.
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![name];
        while let Some(node) = stack.pop() {
            for next in self.dependents(node) {
                if seen.insert(next.as_str()) {
                    stack.push(next.as_str());
                }
            }
        }

        self.execution_order
            .iter()
            .filter(|n| seen.contains(n.as_str()))
            .cloned()
            .collect()
    }

    /// Returns the stages without predecessors, in execution order.
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.is_root())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Returns every `(predecessor, dependent)` edge, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .stages
            .iter()
            .flat_map(|s| {
                s.predecessors
                    .iter()
                    .map(move |p| (p.clone(), s.name.clone()))
            })
            .collect();
        edges.sort();
        edges
    }
}
