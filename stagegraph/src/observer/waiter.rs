//! The poll loop behind asynchronous observer stages.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{EventCursor, EventSource};
use crate::cancellation::CancellationToken;
use crate::core::EventRecord;
use crate::errors::ObserveError;
use crate::stages::{Predicate, Trigger};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A record that satisfied the predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEvent {
    /// The matching record.
    pub record: EventRecord,
    /// Polls performed, including the one that matched.
    pub polls: u32,
    /// Time since the first poll.
    pub elapsed: Duration,
}

/// Polls an [`EventSource`] for the first record matching a predicate.
///
/// The observer keeps no state between calls; each `wait_for` starts reading
/// from the beginning of the source and advances its own cursor.
#[derive(Clone)]
pub struct EventObserver {
    source: Arc<dyn EventSource>,
}

impl EventObserver {
    /// Creates an observer over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    /// Waits for a record matching `predicate`.
    ///
    /// Every poll fetches the records that arrived since the previous poll and
    /// returns the first match in source order. Between polls the task sleeps
    /// for `poll_interval`, never past the deadline, without blocking the
    /// runtime. When `retrigger` is given it is fired again before every poll
    /// but the first; the caller is expected to have fired it once already.
    ///
    /// # Errors
    ///
    /// * `ObserveError::Timeout` once `timeout` has elapsed since the first
    ///   poll without a match. The reported `elapsed` is never below `timeout`.
    /// * `ObserveError::Cancelled` as soon as `cancel` fires.
    /// * `ObserveError::Source` / `ObserveError::Trigger` if a fetch or a
    ///   re-fire fails.
    pub async fn wait_for(
        &self,
        predicate: &Predicate,
        poll_interval: Duration,
        timeout: Duration,
        retrigger: Option<&dyn Trigger>,
        cancel: &CancellationToken,
    ) -> Result<ObservedEvent, ObserveError> {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let started = Instant::now();
        let mut cursor: Option<EventCursor> = None;
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(cancel));
            }

            if polls > 0 {
                if let Some(trigger) = retrigger {
                    trigger.fire().await?;
                }
            }

            polls += 1;
            let batch = self.source.fetch_since(cursor.as_ref()).await?;
            cursor = Some(batch.cursor);

            tracing::trace!(
                poll = polls,
                records = batch.records.len(),
                predicate = predicate.description(),
                "Polled event source"
            );

            if let Some(record) = first_match(batch.records, predicate) {
                let elapsed = started.elapsed();
                tracing::debug!(polls, elapsed = ?elapsed, "Observed matching event");
                return Ok(ObservedEvent {
                    record,
                    polls,
                    elapsed,
                });
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::debug!(polls, elapsed = ?elapsed, "Observation timed out");
                return Err(ObserveError::Timeout { polls, elapsed });
            }

            let wait = poll_interval.min(timeout - elapsed);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => return Err(cancelled(cancel)),
            }
        }
    }
}

fn first_match(records: Vec<EventRecord>, predicate: &Predicate) -> Option<EventRecord> {
    records.into_iter().find(|record| predicate.matches(record))
}

fn cancelled(cancel: &CancellationToken) -> ObserveError {
    ObserveError::Cancelled {
        reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
    }
}

impl std::fmt::Debug for EventObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventObserver").finish_non_exhaustive()
    }
}
