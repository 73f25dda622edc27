//! Stage inputs: the artifacts published by a stage's predecessors.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use super::Artifacts;
use crate::errors::StageError;

/// Provides an immutable view of the predecessors' outputs.
///
/// Only declared predecessors appear; each maps to the outputs it published.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    /// The stage these inputs are for.
    stage_name: String,
    /// Predecessor name to its published outputs.
    by_predecessor: BTreeMap<String, Artifacts>,
}

impl StageInputs {
    /// Creates empty inputs for a stage.
    #[must_use]
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            by_predecessor: BTreeMap::new(),
        }
    }

    /// Adds the outputs of a predecessor.
    #[must_use]
    pub fn with_predecessor(mut self, predecessor: impl Into<String>, outputs: Artifacts) -> Self {
        self.by_predecessor.insert(predecessor.into(), outputs);
        self
    }

    /// Inserts the outputs of a predecessor.
    pub fn insert(&mut self, predecessor: impl Into<String>, outputs: Artifacts) {
        self.by_predecessor.insert(predecessor.into(), outputs);
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns every output of a predecessor.
    #[must_use]
    pub fn from(&self, predecessor: &str) -> Option<&Artifacts> {
        self.by_predecessor.get(predecessor)
    }

    /// Returns one output of a predecessor.
    #[must_use]
    pub fn get(&self, predecessor: &str, output: &str) -> Option<&Bytes> {
        self.by_predecessor.get(predecessor).and_then(|o| o.get(output))
    }

    /// Returns one output or a stage error naming what is missing.
    ///
    /// # Errors
    ///
    /// Returns `StageError` if the predecessor did not publish `output`.
    pub fn require(&self, predecessor: &str, output: &str) -> Result<&Bytes, StageError> {
        self.get(predecessor, output).ok_or_else(|| {
            StageError::new(format!(
                "stage '{}' expected output '{output}' from '{predecessor}'",
                self.stage_name
            ))
        })
    }

    /// Decodes a JSON output of a predecessor.
    ///
    /// # Errors
    ///
    /// Returns `StageError` if the output is missing or is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self, predecessor: &str, output: &str) -> Result<T, StageError> {
        let bytes = self.require(predecessor, output)?;
        serde_json::from_slice(bytes).map_err(|e| {
            StageError::new(format!("invalid JSON in {predecessor}/{output}: {e}"))
        })
    }

    /// Returns the predecessor names in sorted order.
    pub fn predecessors(&self) -> impl Iterator<Item = &str> {
        self.by_predecessor.keys().map(String::as_str)
    }

    /// Returns true if no predecessor published anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_predecessor.values().all(BTreeMap::is_empty)
    }
}
