//! Structural predicates over event records.

use std::fmt;
use std::sync::Arc;

use crate::core::EventRecord;

type MatchFn = dyn Fn(&EventRecord) -> bool + Send + Sync;

/// A named, shareable test applied to each observed record.
#[derive(Clone)]
pub struct Predicate {
    description: String,
    func: Arc<MatchFn>,
}

impl Predicate {
    /// Creates a predicate from a closure.
    pub fn new<F>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EventRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            func: Arc::new(func),
        }
    }

    /// Evaluates the predicate.
    #[must_use]
    pub fn matches(&self, record: &EventRecord) -> bool {
        (self.func)(record)
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .finish()
    }
}

/// Matches records where `key` holds exactly `value`.
#[must_use]
pub fn field_equals(key: impl Into<String>, value: serde_json::Value) -> Predicate {
    let key = key.into();
    let description = format!("{key} == {value}");
    Predicate::new(description, move |record| record.contains(&key, &value))
}

/// Matches records that carry `key`.
#[must_use]
pub fn has_key(key: impl Into<String>) -> Predicate {
    let key = key.into();
    let description = format!("has {key}");
    Predicate::new(description, move |record| record.get(&key).is_some())
}

/// Matches records whose `source` equals `source`.
#[must_use]
pub fn from_source(source: impl Into<String>) -> Predicate {
    let source = source.into();
    let description = format!("source == {source}");
    Predicate::new(description, move |record| record.source.as_deref() == Some(source.as_str()))
}

/// Matches when every predicate matches. An empty list matches everything.
#[must_use]
pub fn all(predicates: Vec<Predicate>) -> Predicate {
    let description = predicates
        .iter()
        .map(Predicate::description)
        .collect::<Vec<_>>()
        .join(" && ");
    Predicate::new(description, move |record| predicates.iter().all(|p| p.matches(record)))
}

/// Matches when any predicate matches. An empty list matches nothing.
#[must_use]
pub fn any(predicates: Vec<Predicate>) -> Predicate {
    let description = predicates
        .iter()
        .map(Predicate::description)
        .collect::<Vec<_>>()
        .join(" || ");
    Predicate::new(description, move |record| predicates.iter().any(|p| p.matches(record)))
}
