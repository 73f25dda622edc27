//! Waiting for externally delivered events.
//!
//! An [`EventSource`] hands out records in batches keyed by a cursor; the
//! [`EventObserver`] polls a source until a record satisfies a predicate or
//! the wait budget runs out.

mod log;
mod memory;
mod waiter;

pub use log::{LogEventSource, LogFetcher};
pub use memory::InMemoryEventSource;
pub use waiter::{EventObserver, ObservedEvent};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::EventRecord;
use crate::errors::SourceError;

/// Opaque position in an event source.
///
/// Only the source that produced a cursor can interpret it. Cursors returned
/// by one source never move backwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCursor(String);

impl EventCursor {
    /// Wraps a source-defined position.
    #[must_use]
    pub fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    /// Creates a cursor for a numeric offset.
    #[must_use]
    pub fn from_offset(offset: usize) -> Self {
        Self(offset.to_string())
    }

    /// Reads the cursor as a numeric offset.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::InvalidCursor` if the cursor is not a number.
    pub fn as_offset(&self) -> Result<usize, SourceError> {
        self.0
            .parse()
            .map_err(|_| SourceError::InvalidCursor(self.0.clone()))
    }

    /// Returns the raw position.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records fetched in one call, plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    /// New records in source order.
    pub records: Vec<EventRecord>,
    /// Position after the last returned record.
    pub cursor: EventCursor,
}

impl EventBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(records: Vec<EventRecord>, cursor: EventCursor) -> Self {
        Self { records, cursor }
    }
}

/// A pollable source of event records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Returns records that became available after `cursor`.
    ///
    /// `None` means "from the beginning". An empty batch still carries a
    /// cursor, which callers pass back on the next call.
    async fn fetch_since<'a>(&self, cursor: Option<&'a EventCursor>) -> Result<EventBatch, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_offsets() {
        let cursor = EventCursor::from_offset(42);
        assert_eq!(cursor.as_offset().unwrap(), 42);
        assert_eq!(cursor.to_string(), "42");
    }

    #[test]
    fn test_non_numeric_cursor() {
        let cursor = EventCursor::new("2024-01-01T00:00:00Z");
        assert!(matches!(
            cursor.as_offset(),
            Err(SourceError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_cursor_serializes_as_string() {
        let json = serde_json::to_string(&EventCursor::from_offset(3)).unwrap();
        assert_eq!(json, "\"3\"");
    }
}
