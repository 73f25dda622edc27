//! Event source over textual log output.
//!
//! Services often report events by printing a JSON object somewhere in a log
//! line, e.g.
//!
//! ```text
//! 2024-05-01T10:00:02Z INFO outlier detector result {"is_outlier": [1], "score": 0.93}
//! ```
//!
//! [`LogEventSource`] re-reads the log through a [`LogFetcher`], skips the
//! lines it has already seen and turns each embedded JSON object into an
//! [`EventRecord`].

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::fmt;

use super::{EventBatch, EventCursor, EventSource};
use crate::core::EventRecord;
use crate::errors::SourceError;
use crate::utils::parse_timestamp;

const OBJECT_START_PATTERN: &str = r"\{";
const TIMESTAMP_PATTERN: &str = r"^\s*(\d{4}-\d{2}-\d{2}T\S+)\s";

/// Reads the current contents of a log, oldest line first.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Returns every line currently in the log.
    async fn fetch_lines(&self) -> Result<Vec<String>, SourceError>;
}

#[async_trait]
impl<F> LogFetcher for F
where
    F: Fn() -> Result<Vec<String>, SourceError> + Send + Sync,
{
    async fn fetch_lines(&self) -> Result<Vec<String>, SourceError> {
        self()
    }
}

/// Event source extracting JSON payloads from log lines.
///
/// The cursor is the number of lines consumed. If the log shrinks below the
/// cursor (rotation, pod restart) reading starts over from the first line.
pub struct LogEventSource<L> {
    fetcher: L,
    name: Option<String>,
    object_start: Regex,
    timestamp: Regex,
}

impl<L: LogFetcher> LogEventSource<L> {
    /// Creates a source reading through `fetcher`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Pattern` if the line patterns fail to compile.
    pub fn new(fetcher: L) -> Result<Self, SourceError> {
        Ok(Self {
            fetcher,
            name: None,
            object_start: Regex::new(OBJECT_START_PATTERN)?,
            timestamp: Regex::new(TIMESTAMP_PATTERN)?,
        })
    }

    /// Tags every record with a source name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the first complete JSON object embedded in `line`.
    ///
    /// Each `{` is tried in turn and parsing stops at the end of the object,
    /// so trailing text (including further objects) is ignored.
    fn first_object(&self, line: &str) -> Option<serde_json::Value> {
        self.object_start.find_iter(line).find_map(|start| {
            let mut de = serde_json::Deserializer::from_str(&line[start.start()..]);
            serde_json::Value::deserialize(&mut de)
                .ok()
                .filter(serde_json::Value::is_object)
        })
    }

    /// Parses one line; lines without a JSON object yield `None`.
    fn parse_line(&self, line: &str) -> Option<EventRecord> {
        let Some(value) = self.first_object(line) else {
            if line.contains('{') {
                tracing::trace!(line, "Log line has no parseable JSON object");
            }
            return None;
        };

        let mut record = EventRecord::from_json(value);
        if let Some(ts) = self
            .timestamp
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| parse_timestamp(m.as_str()).ok())
        {
            record = record.observed_at(ts);
        }
        if let Some(name) = &self.name {
            record = record.with_source(name.clone());
        }
        Some(record)
    }
}

#[async_trait]
impl<L: LogFetcher> EventSource for LogEventSource<L> {
    async fn fetch_since<'a>(&self, cursor: Option<&'a EventCursor>) -> Result<EventBatch, SourceError> {
        let lines = self.fetcher.fetch_lines().await?;
        let mut offset = cursor.map(EventCursor::as_offset).transpose()?.unwrap_or(0);
        if offset > lines.len() {
            tracing::debug!(
                offset,
                lines = lines.len(),
                "Log shorter than cursor, rescanning from start"
            );
            offset = 0;
        }

        let records = lines[offset..]
            .iter()
            .filter_map(|line| self.parse_line(line))
            .collect();

        Ok(EventBatch::new(records, EventCursor::from_offset(lines.len())))
    }
}

impl<L> fmt::Debug for LogEventSource<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEventSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
