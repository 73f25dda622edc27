//! Progress reporting for stage status transitions.
//!
//! The engine publishes every status transition and the run boundaries to an
//! [`EventSink`] handed to it by the caller. There is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
