//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the engine drives a stage to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// The stage's executable unit is called and its return value is the result.
    Synchronous,
    /// The stage fires a trigger and then waits for a matching external event.
    AsyncObserver,
}

impl Default for StageKind {
    fn default() -> Self {
        Self::Synchronous
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synchronous => write!(f, "synchronous"),
            Self::AsyncObserver => write!(f, "async_observer"),
        }
    }
}

/// The execution status of a stage within one run.
///
/// ```text
/// Pending -> Running -> Succeeded | Failed | Cancelled
/// Pending -> Skipped | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting for predecessors.
    Pending,
    /// Currently executing.
    Running,
    /// Completed and its outputs are published.
    Succeeded,
    /// The unit reported an error, the trigger failed, or the observer timed out.
    Failed,
    /// Not run because a predecessor did not succeed.
    Skipped,
    /// Stopped by run-level cancellation.
    Cancelled,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if dependents of a stage in this status must be skipped.
    #[must_use]
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Skipped | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }
}
