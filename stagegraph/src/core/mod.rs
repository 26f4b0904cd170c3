//! Core domain model types for stagegraph.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage and session status enums
//! - Stage output type with factory methods
//! - Session identifiers

mod output;
mod session;
mod status;

pub use output::StageOutput;
pub use session::SessionId;
pub use status::{SessionStatus, StageStatus};
