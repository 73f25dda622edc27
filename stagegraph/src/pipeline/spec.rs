//! Stage specifications.

use std::sync::Arc;

use crate::core::StageKind;
use crate::stages::{ObserverStage, Stage};

/// How a stage is executed.
#[derive(Debug, Clone)]
pub enum StageRunner {
    /// Run the unit and publish what it returns.
    Synchronous(Arc<dyn Stage>),
    /// Fire a trigger, then wait for a matching external event.
    AsyncObserver(ObserverStage),
}

impl StageRunner {
    /// Returns the stage kind this runner implements.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Synchronous(_) => StageKind::Synchronous,
            Self::AsyncObserver(_) => StageKind::AsyncObserver,
        }
    }
}

/// Specification for a single stage in a graph.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Names of the stages this stage consumes, in declaration order.
    pub predecessors: Vec<String>,
    /// The executable unit.
    pub runner: StageRunner,
}

impl StageSpec {
    /// Creates a synchronous stage.
    #[must_use]
    pub fn synchronous(name: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        Self::new(name, StageRunner::Synchronous(stage))
    }

    /// Creates an asynchronous observer stage.
    #[must_use]
    pub fn observer(name: impl Into<String>, observer: ObserverStage) -> Self {
        Self::new(name, StageRunner::AsyncObserver(observer))
    }

    /// Creates a stage with an explicit runner and no predecessors.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: StageRunner) -> Self {
        Self {
            name: name.into(),
            predecessors: Vec::new(),
            runner,
        }
    }

    /// Sets the predecessors. Repeated names are kept once.
    #[must_use]
    pub fn with_predecessors(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.predecessors.clear();
        for name in names {
            self = self.with_predecessor(name);
        }
        self
    }

    /// Adds a predecessor unless it is already declared.
    #[must_use]
    pub fn with_predecessor(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.predecessors.contains(&name) {
            self.predecessors.push(name);
        }
        self
    }

    /// Returns the stage kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.runner.kind()
    }

    /// Returns true if the stage has no predecessors.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.predecessors.is_empty()
    }
}
