//! Utility functions for run identifiers and timestamp handling.

pub mod timestamps;
mod ids;

pub use ids::{generate_run_id, generate_uuid};
pub use timestamps::{iso_timestamp, now_utc, parse_timestamp, Timestamp};
