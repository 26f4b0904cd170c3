//! File-backed checkpoint store.
//!
//! Each session is one JSON document `<root>/<session_id>.json`. Writes go to a
//! sibling temp file first and are then renamed over the target, so a reader
//! sees either the previous record or the new one, never a torn write.

use super::store::check_version;
use super::{Checkpoint, CheckpointStore};
use crate::core::SessionId;
use crate::errors::CheckpointError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const EXTENSION: &str = "json";

/// Checkpoint store that keeps one JSON file per session under a root directory.
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &SessionId) -> Result<PathBuf, CheckpointError> {
        if !session_id.is_valid() {
            return Err(CheckpointError::Backend(format!(
                "session id '{session_id}' cannot be used as a file name"
            )));
        }
        Ok(self.root.join(format!("{session_id}.{EXTENSION}")))
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(session_id)?;
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&json)?;
        if checkpoint.session_id != *session_id || !checkpoint.verify_digest() {
            return Err(CheckpointError::Corrupted {
                session_id: session_id.to_string(),
            });
        }
        Ok(Some(checkpoint))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.read(session_id).await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.session_id)?;
        let lock = self.lock_for(&checkpoint.session_id);
        let _guard = lock.lock().await;

        let stored = match self.read(&checkpoint.session_id).await {
            Ok(existing) => existing.map(|cp| cp.version),
            // A damaged record must not block the next good write.
            Err(CheckpointError::Corrupted { .. } | CheckpointError::Serialization(_)) => None,
            Err(err) => return Err(err),
        };
        check_version(checkpoint, stored)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            path = %path.display(),
            version = checkpoint.version,
            "Checkpoint written"
        );
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, CheckpointError> {
        let path = self.path_for(session_id)?;
        let removed = {
            let lock = self.lock_for(session_id);
            let _guard = lock.lock().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => true,
                Err(err) if err.kind() == ErrorKind::NotFound => false,
                Err(err) => return Err(err.into()),
            }
        };
        self.locks.remove(session_id);
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<SessionId>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(SessionId::new(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Cursor;
    use crate::core::SessionStatus;
    use crate::state::State;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str) -> Checkpoint {
        let state = State::from_value(json!({"score": 0.5, "nested": {"b": 1, "a": 2}})).unwrap();
        let mut cp = Checkpoint::new(SessionId::new(id), "g", state, Cursor::Stage("a".into()));
        cp.seal();
        cp
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("sessions"));

        let cp = record("case-1");
        store.save(&cp).await.unwrap();
        assert!(dir.path().join("sessions").join("case-1.json").exists());

        let loaded = store.load(&SessionId::new("case-1")).await.unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load(&SessionId::new("nope")).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut cp = record("case-1");
        cp.status = SessionStatus::Paused;
        cp.interrupt_pending = true;
        FileCheckpointStore::new(dir.path()).save(&cp).await.unwrap();

        let reopened = FileCheckpointStore::new(dir.path());
        let loaded = reopened.load(&cp.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Paused);
        assert!(loaded.interrupt_pending);
    }

    #[tokio::test]
    async fn test_tampered_state_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let cp = record("case-1");
        store.save(&cp).await.unwrap();

        let path = dir.path().join("case-1.json");
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["state"]["score"] = json!(0.99);
        std::fs::write(&path, value.to_string()).unwrap();

        let err = store.load(&cp.session_id).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let mut cp = record("case-1");
        store.save(&cp).await.unwrap();
        assert!(matches!(
            store.save(&cp).await.unwrap_err(),
            CheckpointError::Conflict { .. }
        ));

        cp.seal();
        store.save(&cp).await.unwrap();
        assert_eq!(store.load(&cp.session_id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&record("b")).await.unwrap();
        store.save(&record("a")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(
            store.list().await.unwrap(),
            vec![SessionId::new("a"), SessionId::new("b")]
        );
        assert!(store.delete(&SessionId::new("a")).await.unwrap());
        assert!(!store.delete(&SessionId::new("a")).await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec![SessionId::new("b")]);
    }

    #[tokio::test]
    async fn test_invalid_session_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let err = store.load(&SessionId::new("../escape")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Backend(_)));
    }
}
