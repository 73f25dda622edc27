//! Run identifier generation.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a run identifier.
///
/// Run ids are hyphenated UUID v4 strings so they can be used directly as
/// file names by the filesystem run ledger.
#[must_use]
pub fn generate_run_id() -> String {
    generate_uuid().hyphenated().to_string()
}
