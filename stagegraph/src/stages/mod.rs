//! Stage executable units, triggers and predicates.
//!
//! A synchronous stage is driven by its [`Stage`] unit. An asynchronous
//! observer stage is described by an [`ObserverStage`]: a [`Trigger`] fired to
//! cause an external effect and a [`Predicate`] recognising the event that
//! effect eventually produces.

#[cfg(feature = "http")]
mod http;
mod observer;
pub mod predicates;
mod retry;
mod trigger;

#[cfg(feature = "http")]
pub use http::{HttpTrigger, HttpTriggerConfig};
pub use observer::{ObserverConfig, ObserverStage};
pub use predicates::Predicate;
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryState, RetryingStage};
pub use trigger::{FnTrigger, NoOpTrigger, Trigger};

#[cfg(test)]
pub use trigger::MockTrigger;

use crate::core::{Artifacts, StageInputs};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// The executable unit of a synchronous stage.
///
/// The engine treats the unit as opaque: it hands over the outputs of the
/// stage's predecessors and stores whatever outputs come back.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the unit (used in logs).
    fn name(&self) -> &str;

    /// Runs the unit against its inputs and returns named outputs.
    async fn run(&self, inputs: &StageInputs) -> Result<Artifacts, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageInputs) -> Result<Artifacts, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInputs) -> Result<Artifacts, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageInputs) -> Result<Artifacts, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageInputs) -> Result<Artifacts, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, inputs: &StageInputs) -> Result<Artifacts, StageError> {
        (self.func)(inputs)
    }
}

/// An async function-based stage.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Artifacts, StageError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Artifacts, StageError>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Artifacts, StageError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Artifacts, StageError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, inputs: &StageInputs) -> Result<Artifacts, StageError> {
        (self.func)(inputs.clone()).await
    }
}

/// A stage that produces no outputs.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _inputs: &StageInputs) -> Result<Artifacts, StageError> {
        Ok(Artifacts::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("double", |inputs: &StageInputs| {
            let raw = inputs.require("source", "n")?;
            let n: u64 = std::str::from_utf8(raw)
                .map_err(|e| StageError::new(e.to_string()))?
                .parse()
                .map_err(|e: std::num::ParseIntError| StageError::new(e.to_string()))?;
            let mut out = Artifacts::new();
            out.insert("n".to_string(), Bytes::from((n * 2).to_string()));
            Ok(out)
        });

        assert_eq!(stage.name(), "double");

        let mut upstream = Artifacts::new();
        upstream.insert("n".to_string(), Bytes::from_static(b"21"));
        let inputs = StageInputs::new("double").with_predecessor("source", upstream);

        let out = stage.run(&inputs).await.unwrap();
        assert_eq!(out.get("n").unwrap().as_ref(), b"42");
    }

    #[tokio::test]
    async fn test_async_fn_stage() {
        let stage = AsyncFnStage::new("async", |inputs: StageInputs| async move {
            let mut out = Artifacts::new();
            out.insert(
                "seen".to_string(),
                Bytes::from(inputs.predecessors().count().to_string()),
            );
            Ok(out)
        });

        let out = stage.run(&StageInputs::new("async")).await.unwrap();
        assert_eq!(out.get("seen").unwrap().as_ref(), b"0");
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");
        assert_eq!(stage.name(), "noop");
        let out = stage.run(&StageInputs::new("noop")).await.unwrap();
        assert!(out.is_empty());
    }
}
