//! In-memory checkpoint store.

use super::store::check_version;
use super::{Checkpoint, CheckpointStore};
use crate::core::SessionId;
use crate::errors::CheckpointError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Checkpoint store backed by a concurrent map.
///
/// Records live as long as the store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: DashMap<SessionId, Checkpoint>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.records.get(session_id).map(|r| r.value().clone()))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        match self.records.entry(checkpoint.session_id.clone()) {
            Entry::Occupied(mut entry) => {
                check_version(checkpoint, Some(entry.get().version))?;
                entry.insert(checkpoint.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(checkpoint.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, CheckpointError> {
        Ok(self.records.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionId>, CheckpointError> {
        let mut ids: Vec<SessionId> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
