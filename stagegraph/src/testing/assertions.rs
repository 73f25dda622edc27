//! Assertions over run results.

use crate::core::StageStatus;
use crate::pipeline::RunResult;

/// Asserts that every stage of the run succeeded.
pub fn assert_run_succeeded(result: &RunResult) {
    assert!(
        result.is_success(),
        "Expected a successful run, got: {:?}",
        result
            .stages
            .iter()
            .map(|s| (s.name.as_str(), s.status))
            .collect::<Vec<_>>()
    );
}

/// Asserts the final status of one stage.
pub fn assert_stage_status(result: &RunResult, stage: &str, expected: StageStatus) {
    let actual = result.status(stage);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}

/// Asserts that `stage` failed with a failure of the given kind.
pub fn assert_stage_failed_with(result: &RunResult, stage: &str, kind: &str) {
    assert_stage_status(result, stage, StageStatus::Failed);
    let actual = result
        .stage(stage)
        .and_then(|s| s.error.as_ref())
        .map(crate::errors::StageFailure::kind);
    assert_eq!(
        actual,
        Some(kind),
        "Expected stage '{stage}' to fail with '{kind}', got {actual:?}"
    );
}

/// Asserts that `first` reached a terminal status before `second`.
pub fn assert_completed_before(result: &RunResult, first: &str, second: &str) {
    let position = |name: &str| result.order_of_completion.iter().position(|s| s == name);
    match (position(first), position(second)) {
        (Some(a), Some(b)) => assert!(
            a < b,
            "Expected '{first}' to complete before '{second}': {:?}",
            result.order_of_completion
        ),
        other => panic!("Stages missing from completion order: {other:?}"),
    }
}
