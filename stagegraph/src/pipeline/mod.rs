//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications and the stage registry
//! - Graph validation (missing predecessors, cycles) and topological ordering
//! - The execution engine and per-run results
//! - Run ledgers for persisting finished runs

mod builder;
mod config;
mod dag;
mod engine;
mod ledger;
mod registry;
mod run;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::{GraphBuilder, PipelineBuilder};
pub use config::{EngineConfig, ExecutionMode};
pub use dag::StageGraph;
pub use engine::{ExecutionEngine, EVENT_OUTPUT};
pub use ledger::{FileRunLedger, InMemoryRunLedger, RunLedger};
pub use registry::StageRegistry;
pub use run::{RunResult, RunSummary, StageRecord};
pub use spec::{StageRunner, StageSpec};
