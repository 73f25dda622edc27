//! Observability utilities.
//!
//! Logging initialisation, span constructors for runs and stages, and a
//! small timer used for stage durations.

mod logging;
mod spans;

pub use logging::{init_logging, init_test_logging, LogFormat};
pub use spans::{run_span, stage_span, SpanTimer};
