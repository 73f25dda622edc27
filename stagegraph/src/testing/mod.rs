//! Testing utilities for stage graphs.
//!
//! This module provides:
//! - Mock stages, triggers and event sources
//! - A harness wiring in-memory collaborators to an engine
//! - Assertions over run results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completed_before, assert_run_succeeded, assert_stage_failed_with, assert_stage_status,
};
pub use fixtures::TestHarness;
pub use mocks::{
    CountingTrigger, ExecutionLog, FailingStage, RecordingStage, ScriptedEventSource,
};
