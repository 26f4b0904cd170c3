//! Durable session checkpoints.
//!
//! This module provides:
//! - The persisted [`Checkpoint`] record and its [`Cursor`]
//! - The [`CheckpointStore`] trait
//! - In-memory and file-backed stores

mod file;
mod memory;
mod record;
mod store;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use record::{Checkpoint, Cursor};
pub use store::CheckpointStore;

#[cfg(test)]
pub use store::MockCheckpointStore;
