//! Core domain model types for stagegraph.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage status and kind enums
//! - Artifact keys, metadata and stage inputs
//! - External event records and lifecycle events

mod artifact;
mod event;
mod inputs;
mod status;

pub use artifact::{content_digest, ArtifactKey, ArtifactMeta, Artifacts};
pub use event::{EventRecord, StageEvent};
pub use inputs::StageInputs;
pub use status::{StageKind, StageStatus};
