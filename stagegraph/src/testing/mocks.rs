//! Mock stages, triggers and event sources.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Artifacts, EventRecord, StageInputs};
use crate::errors::{SourceError, StageError, TriggerError};
use crate::observer::{EventBatch, EventCursor, EventSource};
use crate::stages::{Stage, Trigger};

/// Shared, ordered log of stage invocations.
///
/// Hand one clone to every [`RecordingStage`] of a graph to observe the
/// order stages started in.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns every entry in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of the first entry equal to `entry`.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Returns true if `entry` was recorded.
    #[must_use]
    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// A stage that records its invocations and returns fixed outputs.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    outputs: Artifacts,
    delay: Option<Duration>,
    log: ExecutionLog,
    inputs: Mutex<Vec<StageInputs>>,
}

impl RecordingStage {
    /// Creates a recording stage writing to its own log.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: Artifacts::new(),
            delay: None,
            log: ExecutionLog::new(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Records into a shared log.
    #[must_use]
    pub fn with_log(mut self, log: &ExecutionLog) -> Self {
        self.log = log.clone();
        self
    }

    /// Adds an output the stage will publish.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.outputs.insert(output.into(), data.into());
        self
    }

    /// Sleeps for `delay` (on the tokio clock) before returning.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the inputs of the most recent invocation.
    #[must_use]
    pub fn last_inputs(&self) -> Option<StageInputs> {
        self.inputs.lock().last().cloned()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, inputs: &StageInputs) -> Result<Artifacts, StageError> {
        self.log.record(&self.name);
        self.inputs.lock().push(inputs.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.outputs.clone())
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    retryable: bool,
    calls: AtomicUsize,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            retryable: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a failing stage whose error is marked retryable.
    #[must_use]
    pub fn retryable(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(name, error)
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _inputs: &StageInputs) -> Result<Artifacts, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.retryable {
            Err(StageError::retryable(&self.error))
        } else {
            Err(StageError::new(&self.error))
        }
    }
}

/// A trigger that counts how often it was fired.
#[derive(Debug, Default)]
pub struct CountingTrigger {
    fired: AtomicU32,
    failure: Option<String>,
}

impl CountingTrigger {
    /// Creates a trigger that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a trigger that counts and then fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fired: AtomicU32::new(0),
            failure: Some(message.into()),
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trigger for CountingTrigger {
    async fn fire(&self) -> Result<(), TriggerError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(TriggerError::Failed(message.clone())),
            None => Ok(()),
        }
    }
}

/// One scripted answer of a [`ScriptedEventSource`].
#[derive(Debug, Clone)]
enum Step {
    Records(Vec<EventRecord>),
    Fail(SourceError),
}

/// Event source replaying a fixed script, one step per fetch.
///
/// Once the script is exhausted every fetch returns an empty batch. The
/// cursor counts fetches.
#[derive(Debug, Default)]
pub struct ScriptedEventSource {
    steps: Mutex<VecDeque<Step>>,
    fetches: AtomicU32,
}

impl ScriptedEventSource {
    /// Creates a source with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the next fetch with `records`.
    #[must_use]
    pub fn then_records(self, records: Vec<EventRecord>) -> Self {
        self.steps.lock().push_back(Step::Records(records));
        self
    }

    /// Answers the next `n` fetches with nothing.
    #[must_use]
    pub fn then_empty(self, n: usize) -> Self {
        {
            let mut steps = self.steps.lock();
            for _ in 0..n {
                steps.push_back(Step::Records(Vec::new()));
            }
        }
        self
    }

    /// Fails the next fetch.
    #[must_use]
    pub fn then_error(self, error: SourceError) -> Self {
        self.steps.lock().push_back(Step::Fail(error));
        self
    }

    /// Returns the number of fetches so far.
    #[must_use]
    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn fetch_since<'a>(&self, _cursor: Option<&'a EventCursor>) -> Result<EventBatch, SourceError> {
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let cursor = EventCursor::new(fetch.to_string());
        match self.steps.lock().pop_front() {
            Some(Step::Records(records)) => Ok(EventBatch::new(records, cursor)),
            Some(Step::Fail(error)) => Err(error),
            None => Ok(EventBatch::new(Vec::new(), cursor)),
        }
    }
}
