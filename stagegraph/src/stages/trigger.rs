//! Triggers fired by observer stages.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::TriggerError;

/// An externally supplied side effect expected to eventually cause an event.
///
/// Only success or failure of the call is inspected.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Fires the side effect.
    async fn fire(&self) -> Result<(), TriggerError>;
}

/// A trigger that does nothing, for observers waiting on events caused elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTrigger;

#[async_trait]
impl Trigger for NoOpTrigger {
    async fn fire(&self) -> Result<(), TriggerError> {
        Ok(())
    }
}

/// A closure-backed trigger.
pub struct FnTrigger<F>
where
    F: Fn() -> Result<(), TriggerError> + Send + Sync,
{
    func: F,
}

impl<F> FnTrigger<F>
where
    F: Fn() -> Result<(), TriggerError> + Send + Sync,
{
    /// Creates a new closure-backed trigger.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnTrigger<F>
where
    F: Fn() -> Result<(), TriggerError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTrigger").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Trigger for FnTrigger<F>
where
    F: Fn() -> Result<(), TriggerError> + Send + Sync,
{
    async fn fire(&self) -> Result<(), TriggerError> {
        (self.func)()
    }
}
