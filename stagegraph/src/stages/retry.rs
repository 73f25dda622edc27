//! Stage-level retry with configurable backoff and jitter.
//!
//! The engine never retries a failed stage. A stage that wants retries wraps
//! its unit in a [`RetryingStage`], which retries errors marked retryable.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Stage;
use crate::core::{Artifacts, StageInputs};
use crate::errors::StageError;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts (including the initial one).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// State tracking for retry operations.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Number of retries performed so far.
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no attempts remain after the current one.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempt + 1 >= config.max_attempts
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let attempt = u32::try_from(self.attempt).unwrap_or(u32::MAX);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(attempt)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Wraps a stage unit and retries its retryable errors.
#[derive(Debug)]
pub struct RetryingStage<S: Stage> {
    inner: S,
    config: RetryConfig,
}

impl<S: Stage> RetryingStage<S> {
    /// Wraps `inner` with the given retry policy.
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Returns the retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<S: Stage> Stage for RetryingStage<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, inputs: &StageInputs) -> Result<Artifacts, StageError> {
        let mut state = RetryState::new();

        loop {
            match self.inner.run(inputs).await {
                Ok(outputs) => return Ok(outputs),
                Err(e) if e.retryable && !state.is_exhausted(&self.config) => {
                    let delay = state.calculate_delay(&self.config);
                    state.attempt += 1;
                    tracing::debug!(
                        stage = %self.inner.name(),
                        attempt = state.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying stage after error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Flaky {
        calls: Arc<AtomicUsize>,
        succeed_on: usize,
        retryable: bool,
    }

    #[async_trait]
    impl Stage for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self, _inputs: &StageInputs) -> Result<Artifacts, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(Artifacts::new())
            } else if self.retryable {
                Err(StageError::retryable("endpoint not ready"))
            } else {
                Err(StageError::new("bad input"))
            }
        }
    }

    fn no_jitter(max_attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(max_attempts)
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
    }

    #[test]
    fn test_calculate_delay_exponential_no_jitter() {
        let config = no_jitter(5);
        let mut state = RetryState::new();

        assert_eq!(state.calculate_delay(&config), Duration::from_millis(100));
        state.attempt = 1;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(200));
        state.attempt = 3;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(800));
    }

    #[test]
    fn test_calculate_delay_linear_and_capped() {
        let config = no_jitter(5)
            .with_backoff(BackoffStrategy::Linear)
            .with_max_delay_ms(250);
        let mut state = RetryState::new();
        state.attempt = 1;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(200));
        state.attempt = 4;
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(250));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new().with_base_delay_ms(100);
        let state = RetryState::new();
        for _ in 0..50 {
            assert!(state.calculate_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_stage_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = RetryingStage::new(
            Flaky {
                calls: calls.clone(),
                succeed_on: 3,
                retryable: true,
            },
            no_jitter(3),
        );

        assert!(stage.run(&StageInputs::new("flaky")).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_stage_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = RetryingStage::new(
            Flaky {
                calls: calls.clone(),
                succeed_on: 10,
                retryable: true,
            },
            no_jitter(2),
        );

        let err = stage.run(&StageInputs::new("flaky")).await.unwrap_err();
        assert!(err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stage = RetryingStage::new(
            Flaky {
                calls: calls.clone(),
                succeed_on: 2,
                retryable: false,
            },
            no_jitter(5),
        );

        assert!(stage.run(&StageInputs::new("flaky")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
