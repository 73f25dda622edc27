//! In-memory event source.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{EventBatch, EventCursor, EventSource};
use crate::core::EventRecord;
use crate::errors::SourceError;

/// Append-only event log held in memory. The cursor is a record offset.
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    records: RwLock<Vec<EventRecord>>,
}

impl InMemoryEventSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn push(&self, record: EventRecord) {
        self.records.write().push(record);
    }

    /// Appends a record built from a JSON value.
    pub fn push_json(&self, value: serde_json::Value) {
        self.push(EventRecord::from_json(value));
    }

    /// Returns the number of records ever appended.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn fetch_since<'a>(&self, cursor: Option<&'a EventCursor>) -> Result<EventBatch, SourceError> {
        let offset = cursor.map(EventCursor::as_offset).transpose()?.unwrap_or(0);
        let records = self.records.read();
        if offset > records.len() {
            return Err(SourceError::InvalidCursor(format!(
                "offset {offset} beyond end of log ({})",
                records.len()
            )));
        }

        Ok(EventBatch::new(
            records[offset..].to_vec(),
            EventCursor::from_offset(records.len()),
        ))
    }
}
