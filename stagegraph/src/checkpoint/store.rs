//! Checkpoint store trait.

use super::Checkpoint;
use crate::core::SessionId;
use crate::errors::CheckpointError;
use async_trait::async_trait;

/// Durable persistence of session checkpoints keyed by session id.
///
/// Implementations must serialize writes per session and reject a save whose
/// `version` is not newer than the stored one with [`CheckpointError::Conflict`].
/// Distinct sessions may be served concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the latest checkpoint for a session.
    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Persists a checkpoint, replacing the previous one.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Removes a session's checkpoint. Returns true if one existed.
    async fn delete(&self, session_id: &SessionId) -> Result<bool, CheckpointError>;

    /// Lists every stored session id.
    async fn list(&self) -> Result<Vec<SessionId>, CheckpointError>;
}

pub(crate) fn check_version(
    checkpoint: &Checkpoint,
    stored: Option<u64>,
) -> Result<(), CheckpointError> {
    match stored {
        Some(stored) if stored >= checkpoint.version => Err(CheckpointError::Conflict {
            session_id: checkpoint.session_id.to_string(),
            stored,
            attempted: checkpoint.version,
        }),
        _ => Ok(()),
    }
}
