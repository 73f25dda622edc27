//! Externally observed event records and engine lifecycle events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::StageStatus;
use crate::utils::{now_utc, Timestamp};

/// A record delivered by an external event source.
///
/// The payload is a structural mapping matched by observer predicates.
/// Records carry no ordering guarantee relative to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The structural payload.
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Where the record came from (e.g. a log stream name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When the source observed the record.
    pub observed_at: Timestamp,
}

impl EventRecord {
    /// Creates a record from a payload map.
    #[must_use]
    pub fn new(payload: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            payload,
            source: None,
            observed_at: now_utc(),
        }
    }

    /// Creates a record from a JSON value; non-object values are stored under `"value"`.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self::new(map),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                Self::new(map)
            }
        }
    }

    /// Sets the source name.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the observation time.
    #[must_use]
    pub fn observed_at(mut self, at: Timestamp) -> Self {
        self.observed_at = at;
        self
    }

    /// Returns the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }

    /// Returns true if `key` is present with exactly `value`.
    #[must_use]
    pub fn contains(&self, key: &str, value: &serde_json::Value) -> bool {
        self.payload.get(key) == Some(value)
    }
}

/// A lifecycle event emitted by the engine for progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    /// The event type (e.g., "stage.running", "run.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred.
    pub timestamp: Timestamp,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl StageEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: now_utc(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Creates a `stage.<status>` event for a status transition.
    #[must_use]
    pub fn transition(run_id: &str, stage: &str, status: StageStatus) -> Self {
        Self::new(format!("stage.{status}"))
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("status", serde_json::json!(status))
    }

    /// Creates a `run.started` event.
    #[must_use]
    pub fn run_started(run_id: &str, pipeline: &str, stage_count: usize) -> Self {
        Self::new("run.started")
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("stage_count", serde_json::json!(stage_count))
    }

    /// Creates a `run.completed` event.
    #[must_use]
    pub fn run_completed(run_id: &str, success: bool, duration_ms: f64) -> Self {
        Self::new("run.completed")
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("success", serde_json::json!(success))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Returns the stage name carried by the event, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.data.get("stage").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_object() {
        let record = EventRecord::from_json(json!({"is_outlier": [1], "score": 3.2}));
        assert!(record.contains("is_outlier", &json!([1])));
        assert!(!record.contains("is_outlier", &json!([0])));
        assert_eq!(record.get("score"), Some(&json!(3.2)));
    }

    #[test]
    fn test_record_from_scalar() {
        let record = EventRecord::from_json(json!("hello"));
        assert_eq!(record.get("value"), Some(&json!("hello")));
    }

    #[test]
    fn test_record_source() {
        let record = EventRecord::from_json(json!({})).with_source("detector-logs");
        assert_eq!(record.source.as_deref(), Some("detector-logs"));
    }

    #[test]
    fn test_transition_event() {
        let event = StageEvent::transition("run-1", "train", StageStatus::Succeeded);
        assert_eq!(event.event_type, "stage.succeeded");
        assert_eq!(event.stage(), Some("train"));
        assert_eq!(event.data.get("status"), Some(&json!("succeeded")));
    }

    #[test]
    fn test_run_events() {
        let started = StageEvent::run_started("run-1", "ml", 4);
        assert_eq!(started.event_type, "run.started");
        assert_eq!(started.data.get("stage_count"), Some(&json!(4)));

        let completed = StageEvent::run_completed("run-1", false, 12.5);
        assert_eq!(completed.data.get("success"), Some(&json!(false)));
        assert!(completed.stage().is_none());
    }

    #[test]
    fn test_event_serialization() {
        let event = StageEvent::new("test").add_data("x", json!(1));
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: StageEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event_type, deserialized.event_type);
    }
}
