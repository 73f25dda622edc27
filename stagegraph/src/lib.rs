//! # Stagegraph
//!
//! A dependency-graph engine for pipeline stages.
//!
//! Stagegraph compiles a set of named stages with declared predecessors into a
//! validated DAG and executes it:
//!
//! - **Graph validation**: unknown predecessors and cycles are rejected before
//!   anything runs; the execution order is deterministic
//! - **Dependency-driven execution**: a stage starts once all of its
//!   predecessors have succeeded; independent branches run concurrently
//! - **Artifact handoff**: outputs go through a content-addressed store and
//!   are visible to dependents before they are dispatched
//! - **Asynchronous observer stages**: fire a trigger, then poll an event
//!   source until a record matches a predicate or the wait budget runs out
//! - **Cancellation**: a run-level token stops dispatch and wakes waiting
//!   observers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagegraph::prelude::*;
//!
//! let graph = PipelineBuilder::new("ml")
//!     .stage("prep", prep, &[])
//!     .stage("train", train, &["prep"])
//!     .observer("detect", detector, &["train"])
//!     .build()?;
//!
//! let result = ExecutionEngine::new(EngineConfig::default())
//!     .execute(&graph, store, events, Arc::new(CancellationToken::new()))
//!     .await?;
//! assert!(result.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod observer;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{
        ArtifactKey, ArtifactMeta, Artifacts, EventRecord, StageEvent, StageInputs, StageKind,
        StageStatus,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, GraphError, ObserveError, StageError,
        StageFailure, StagegraphError, StoreError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observer::{
        EventBatch, EventCursor, EventObserver, EventSource, InMemoryEventSource, LogEventSource,
    };
    pub use crate::pipeline::{
        EngineConfig, ExecutionEngine, ExecutionMode, PipelineBuilder, RunLedger, RunResult,
        StageGraph, StageRegistry, StageSpec,
    };
    pub use crate::stages::{
        predicates, FnStage, FnTrigger, ObserverConfig, ObserverStage, Predicate, Stage, Trigger,
    };
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore, StoreConfig};
    pub use crate::utils::{generate_run_id, now_utc, Timestamp};
}
