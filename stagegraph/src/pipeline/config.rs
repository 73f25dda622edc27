//! Execution engine configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StagegraphError;

/// How ready stages are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every ready stage runs as its own task.
    #[default]
    Concurrent,
    /// One stage at a time, in execution order.
    Sequential,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrent => write!(f, "concurrent"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = StagegraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(Self::Concurrent),
            "sequential" => Ok(Self::Sequential),
            other => Err(StagegraphError::Config(format!(
                "unknown execution mode '{other}' (expected 'concurrent' or 'sequential')"
            ))),
        }
    }
}

/// Configuration for [`super::ExecutionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Dispatch mode.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Upper bound on stages running at once in concurrent mode.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Fixed run id; a fresh UUID is generated per run when unset.
    #[serde(default)]
    pub run_id: Option<String>,
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequential configuration.
    #[must_use]
    pub fn sequential() -> Self {
        Self::default().with_mode(ExecutionMode::Sequential)
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bounds concurrent stages. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Fixes the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Reads `STAGEGRAPH_MODE` and `STAGEGRAPH_MAX_CONCURRENCY`; unset
    /// variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `StagegraphError::Config` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, StagegraphError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StagegraphError> {
        let mut config = Self::default();
        if let Some(mode) = lookup("STAGEGRAPH_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(limit) = lookup("STAGEGRAPH_MAX_CONCURRENCY") {
            let limit: usize = limit.trim().parse().map_err(|_| {
                StagegraphError::Config(format!("STAGEGRAPH_MAX_CONCURRENCY must be a number, got '{limit}'"))
            })?;
            config = config.with_max_concurrency(limit);
        }
        Ok(config)
    }

    /// Returns the concurrency bound for the configured mode.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        match self.mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Concurrent => self.max_concurrency.unwrap_or(usize::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.mode, ExecutionMode::Concurrent);
        assert_eq!(config.concurrency_limit(), usize::MAX);
        assert!(config.run_id.is_none());
    }

    #[test]
    fn test_sequential_limit() {
        let config = EngineConfig::sequential().with_max_concurrency(8);
        assert_eq!(config.concurrency_limit(), 1);
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        assert_eq!(EngineConfig::new().with_max_concurrency(0).concurrency_limit(), 1);
    }

    #[test]
    fn test_from_lookup() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("STAGEGRAPH_MODE", "Sequential"),
            ("STAGEGRAPH_MAX_CONCURRENCY", "4"),
        ]))
        .unwrap();

        assert_eq!(config.mode, ExecutionMode::Sequential);
        assert_eq!(config.max_concurrency, Some(4));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(EngineConfig::from_lookup(lookup(&[("STAGEGRAPH_MODE", "parallel")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("STAGEGRAPH_MAX_CONCURRENCY", "many")])).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"mode": "sequential", "run_id": "r1"}"#).unwrap();
        assert_eq!(config, EngineConfig::sequential().with_run_id("r1"));
    }
}
