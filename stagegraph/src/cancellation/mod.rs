//! Structured cancellation utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation
//! - StructuredTaskGroup for running related tasks that never outlive their scope

mod task_group;
mod token;

pub(crate) use task_group::panic_message;
pub use task_group::StructuredTaskGroup;
pub use token::CancellationToken;
