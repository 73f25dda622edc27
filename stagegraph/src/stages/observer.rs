//! Description of an asynchronous observer stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{Predicate, Trigger};

/// Wait budget of an observer stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Delay between polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum wait in milliseconds, measured from the first poll.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether to fire the trigger again before every poll.
    #[serde(default)]
    pub retrigger_each_poll: bool,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            retrigger_each_poll: false,
        }
    }
}

impl ObserverConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    /// Enables firing the trigger before every poll.
    #[must_use]
    pub fn retrigger_each_poll(mut self) -> Self {
        self.retrigger_each_poll = true;
        self
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Gets the timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// An asynchronous observer stage: fire a trigger, then wait for a matching event.
#[derive(Clone)]
pub struct ObserverStage {
    /// The side effect expected to cause the event.
    pub trigger: Arc<dyn Trigger>,
    /// Recognises the awaited event.
    pub predicate: Predicate,
    /// Poll interval, timeout and retrigger policy.
    pub config: ObserverConfig,
}

impl ObserverStage {
    /// Creates an observer stage with the default wait budget.
    #[must_use]
    pub fn new(trigger: Arc<dyn Trigger>, predicate: Predicate) -> Self {
        Self {
            trigger,
            predicate,
            config: ObserverConfig::default(),
        }
    }

    /// Replaces the wait budget.
    #[must_use]
    pub fn with_config(mut self, config: ObserverConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for ObserverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverStage")
            .field("predicate", &self.predicate)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
