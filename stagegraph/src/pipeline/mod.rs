//! Graph definition and validation.
//!
//! This module provides:
//! - Stage and edge specifications
//! - Routers and fan-out dispatchers
//! - The graph builder with structural validation
//! - Fan-out failure policies

mod builder;
mod failure_tolerance;
mod graph;
mod routing;
mod spec;

pub use builder::GraphBuilder;
pub use failure_tolerance::{FailureCollector, FailureRecord, FanOutPolicy};
pub use graph::CompiledGraph;
pub use routing::{Dispatcher, FanOutTarget, FnRouter, Router, ThresholdRouter};
pub use spec::{edge_id, ConditionalEdge, FanOutEdge, FeedbackSpec, StageSpec, Transition};
