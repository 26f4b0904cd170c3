//! # Stagegraph
//!
//! An embeddable engine that drives long-running, multi-step workflows
//! expressed as declarative stage graphs.
//!
//! Stagegraph provides:
//!
//! - **Declarative graphs**: stages joined by fixed, conditional and fan-out
//!   edges, validated once at build time
//! - **Bounded feedback cycles**: backward routes whose iteration budget is
//!   enforced by the engine, not the router
//! - **Fan-out / join**: runtime-computed parallel children with a barrier join
//! - **Interrupt & resume**: pause before designated stages and continue with a
//!   caller-supplied state patch
//! - **Checkpointing**: every step persisted per session id, so sessions
//!   survive restarts and replay deterministically
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagegraph::prelude::*;
//!
//! let graph = GraphBuilder::new("triage")
//!     .stage("classify", Arc::new(ClassifyStage))
//!     .stage("review", Arc::new(ReviewStage))
//!     .stage("report", Arc::new(ReportStage))
//!     .conditional(
//!         "classify",
//!         ConditionalEdge::new(ThresholdRouter::new("score", 0.75, "low", "high"))
//!             .route("low", "review")
//!             .route("high", "report"),
//!     )
//!     .edge("review", "report")
//!     .start("classify")
//!     .terminal("report")
//!     .interrupt_before("review")
//!     .build()?;
//!
//! let engine = Engine::in_memory(graph);
//! let status = engine.start("case-1", State::new()).await?;
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
pub mod checkpoint;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod stages;
pub mod state;
pub mod telemetry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, StructuredTaskGroup};
    pub use crate::checkpoint::{
        Checkpoint, CheckpointStore, Cursor, FileCheckpointStore, InMemoryCheckpointStore,
    };
    pub use crate::core::{SessionId, SessionStatus, StageOutput, StageStatus};
    pub use crate::engine::{Engine, EngineConfig};
    pub use crate::errors::{
        BuildError, CheckpointError, ConfigError, ContractErrorInfo, FailureKind, GraphError,
        RouteError, StageFailure,
    };
    pub use crate::events::{
        CollectingEventSink, EngineEvent, EventSink, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::pipeline::{
        CompiledGraph, ConditionalEdge, Dispatcher, FanOutEdge, FanOutPolicy, FanOutTarget,
        FnRouter, GraphBuilder, Router, StageSpec, ThresholdRouter,
    };
    pub use crate::stages::{AsyncFnStage, FanIn, FnStage, NoOpStage, Stage, StageInput};
    pub use crate::state::{Reducer, State, StateUpdate};
    pub use std::sync::Arc;
}
