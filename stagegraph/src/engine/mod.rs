//! The execution engine and its session API.
//!
//! An [`Engine`] drives one [`CompiledGraph`] for any number of sessions. Each
//! session is a single logical thread of control: a second call for a session
//! that is already being driven is rejected with [`GraphError::SessionBusy`].
//! Distinct sessions run fully independently.
//!
//! ```rust,ignore
//! let engine = Engine::new(graph, Arc::new(InMemoryCheckpointStore::new()));
//! let status = engine.start("case-1", State::new()).await?;
//! if status == SessionStatus::Paused {
//!     engine.resume("case-1", StateUpdate::new().set("approved", json!(true))).await?;
//! }
//! ```

mod config;
mod fanout;
mod runner;


pub use config::{
    EngineConfig, ENV_FAN_OUT_CONCURRENCY, ENV_FAN_OUT_POLICY, ENV_INTERRUPT_BEFORE,
    ENV_MAX_ITERATIONS, ENV_MAX_STEPS, ENV_STAGE_TIMEOUT_MS,
};

use crate::cancellation::CancellationToken;
use crate::checkpoint::{Checkpoint, CheckpointStore, Cursor, InMemoryCheckpointStore};
use crate::core::{SessionId, SessionStatus};
use crate::errors::{FailureKind, GraphError, StageFailure};
use crate::events::{event_types, EngineEvent, EventSink, NoOpEventSink};
use crate::pipeline::CompiledGraph;
use crate::state::{State, StateUpdate};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, Instrument};

/// Drives sessions through a compiled graph.
pub struct Engine {
    graph: Arc<CompiledGraph>,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    interrupts: BTreeSet<String>,
    active: DashMap<SessionId, Arc<CancellationToken>>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new(graph: CompiledGraph, store: Arc<dyn CheckpointStore>) -> Self {
        let interrupts = graph.interrupts().clone();
        Self {
            graph: Arc::new(graph),
            store,
            config: EngineConfig::default(),
            events: Arc::new(NoOpEventSink),
            interrupts,
            active: DashMap::new(),
        }
    }

    /// Creates an engine backed by an [`InMemoryCheckpointStore`].
    pub fn in_memory(graph: CompiledGraph) -> Self {
        Self::new(graph, Arc::new(InMemoryCheckpointStore::new()))
    }

    /// Applies a configuration.
    ///
    /// Interrupt points named in the configuration are added to those declared
    /// on the graph and must pass the same checks.
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self, GraphError> {
        config.validate()?;
        let mut interrupts = self.graph.interrupts().clone();
        for name in &config.interrupt_before {
            self.graph.check_interrupt(name)?;
            interrupts.insert(name.clone());
        }
        self.interrupts = interrupts;
        self.config = config;
        Ok(self)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Returns the graph.
    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the effective interrupt points.
    pub fn interrupts(&self) -> &BTreeSet<String> {
        &self.interrupts
    }

    /// Returns true while a call is driving the session.
    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    /// Starts a new session and runs it until it pauses, completes or fails.
    ///
    /// Returns [`SessionStatus::Paused`] or [`SessionStatus::Completed`]; a
    /// session that fails is reported as an error and persisted as failed.
    pub async fn start(
        &self,
        session_id: impl Into<SessionId>,
        initial: State,
    ) -> Result<SessionStatus, GraphError> {
        let session_id = session_id.into();
        if !session_id.is_valid() {
            return Err(GraphError::InvalidSessionId(session_id.to_string()));
        }
        let (_guard, token) = self.claim(&session_id)?;

        if self.store.load(&session_id).await?.is_some() {
            return Err(GraphError::SessionExists(session_id.to_string()));
        }

        let span = tracing::info_span!("session", session_id = %session_id, graph = %self.graph.name());
        async {
            let mut checkpoint = Checkpoint::new(
                session_id.clone(),
                self.graph.name(),
                initial,
                Cursor::Stage(self.graph.start().to_string()),
            );
            info!(start = %self.graph.start(), "Session started");
            self.emit(
                EngineEvent::new(event_types::SESSION_STARTED, &session_id)
                    .with_data(json!({"graph": self.graph.name(), "start": self.graph.start()})),
            )
            .await;

            self.persist(&mut checkpoint).await?;
            self.drive(checkpoint, &token, None).await
        }
        .instrument(span)
        .await
    }

    /// Resumes a paused session with a state patch (possibly empty).
    ///
    /// The patch is merged with the graph's reducers. It becomes durable only
    /// once the paused stage completes; if that stage fails the session keeps
    /// the pre-patch state.
    pub async fn resume(
        &self,
        session_id: impl Into<SessionId>,
        patch: StateUpdate,
    ) -> Result<SessionStatus, GraphError> {
        let session_id = session_id.into();
        let (_guard, token) = self.claim(&session_id)?;
        let checkpoint = self.load(&session_id).await?;

        if checkpoint.status != SessionStatus::Paused || !checkpoint.interrupt_pending {
            return Err(GraphError::ResumeMisuse {
                session_id: session_id.to_string(),
                status: checkpoint.status,
            });
        }

        let span = tracing::info_span!("session", session_id = %session_id, graph = %self.graph.name());
        async {
            let stage = checkpoint.cursor.stage().map(str::to_string);
            let mut working = checkpoint.clone();
            working.state.apply(&patch, self.graph.reducers());
            working.status = SessionStatus::Running;
            working.interrupt_pending = false;

            info!(stage = ?stage, patched_fields = patch.len(), "Session resumed");
            let mut event = EngineEvent::new(event_types::SESSION_RESUMED, &session_id)
                .with_data(json!({"patched_fields": patch.len()}));
            if let Some(stage) = &stage {
                event = event.with_stage(stage.clone());
            }
            self.emit(event).await;

            self.drive_from(checkpoint, working, &token, stage).await
        }
        .instrument(span)
        .await
    }

    /// Continues a `Running` session from its last checkpoint.
    ///
    /// Used after a process restart: the checkpoint's cursor names exactly
    /// what runs next, so no completed stage is repeated.
    pub async fn recover(&self, session_id: impl Into<SessionId>) -> Result<SessionStatus, GraphError> {
        let session_id = session_id.into();
        let (_guard, token) = self.claim(&session_id)?;
        let checkpoint = self.load(&session_id).await?;

        match checkpoint.status {
            SessionStatus::Running => {}
            SessionStatus::Paused => {
                return Err(GraphError::ResumeMisuse {
                    session_id: session_id.to_string(),
                    status: checkpoint.status,
                })
            }
            status => {
                return Err(GraphError::SessionClosed {
                    session_id: session_id.to_string(),
                    status,
                })
            }
        }

        let span = tracing::info_span!("session", session_id = %session_id, graph = %self.graph.name());
        async {
            info!(cursor = %checkpoint.cursor, step = checkpoint.step, "Session recovering");
            self.drive(checkpoint, &token, None).await
        }
        .instrument(span)
        .await
    }

    /// Aborts a session.
    ///
    /// A session being driven is cancelled: in-flight fan-out children are
    /// stopped and the driving call returns [`GraphError::Cancelled`]. An idle
    /// session is marked failed directly. Either way the last checkpoint is
    /// kept, with status `Failed`.
    pub async fn abort(
        &self,
        session_id: impl Into<SessionId>,
        reason: impl Into<String>,
    ) -> Result<(), GraphError> {
        let session_id = session_id.into();
        let reason = reason.into();

        if let Some(token) = self.active.get(&session_id).map(|t| t.value().clone()) {
            token.cancel(reason);
            return Ok(());
        }

        let (_guard, _token) = self.claim(&session_id)?;
        let checkpoint = self.load(&session_id).await?;
        if checkpoint.status.is_closed() {
            return Err(GraphError::SessionClosed {
                session_id: session_id.to_string(),
                status: checkpoint.status,
            });
        }

        match self.cancel_session(checkpoint, &reason).await {
            GraphError::Cancelled { .. } => Ok(()),
            other => Err(other),
        }
    }

    /// Returns the persisted state of a session.
    pub async fn get_state(&self, session_id: impl Into<SessionId>) -> Result<State, GraphError> {
        Ok(self.load(&session_id.into()).await?.state)
    }

    /// Returns the status of a session.
    pub async fn get_status(
        &self,
        session_id: impl Into<SessionId>,
    ) -> Result<SessionStatus, GraphError> {
        Ok(self.load(&session_id.into()).await?.status)
    }

    /// Returns the full persisted checkpoint of a session.
    pub async fn get_checkpoint(
        &self,
        session_id: impl Into<SessionId>,
    ) -> Result<Checkpoint, GraphError> {
        self.load(&session_id.into()).await
    }

    /// Lists every session known to the checkpoint store.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>, GraphError> {
        Ok(self.store.list().await?)
    }

    /// Deletes a session's checkpoint.
    pub async fn delete_session(&self, session_id: impl Into<SessionId>) -> Result<(), GraphError> {
        let session_id = session_id.into();
        let (_guard, _token) = self.claim(&session_id)?;
        if self.store.delete(&session_id).await? {
            info!(session_id = %session_id, "Session deleted");
            Ok(())
        } else {
            Err(GraphError::SessionNotFound(session_id.to_string()))
        }
    }

    async fn load(&self, session_id: &SessionId) -> Result<Checkpoint, GraphError> {
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))
    }

    async fn emit(&self, event: EngineEvent) {
        self.events.emit(&event).await;
    }

    /// Marks the session as driven by the current call.
    fn claim(
        &self,
        session_id: &SessionId,
    ) -> Result<(ActiveGuard<'_>, Arc<CancellationToken>), GraphError> {
        match self.active.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(GraphError::SessionBusy(session_id.to_string())),
            Entry::Vacant(entry) => {
                let token = Arc::new(CancellationToken::new());
                entry.insert(token.clone());
                Ok((
                    ActiveGuard {
                        active: &self.active,
                        session_id: session_id.clone(),
                    },
                    token,
                ))
            }
        }
    }

    /// Persists a cancellation failure on `checkpoint` and builds the error.
    async fn cancel_session(&self, checkpoint: Checkpoint, reason: &str) -> GraphError {
        let session_id = checkpoint.session_id.clone();
        let stage = checkpoint.cursor.to_string();
        let failure = StageFailure::new(stage, FailureKind::Cancelled, reason);
        let err = GraphError::Cancelled {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        };
        self.emit(
            EngineEvent::new(event_types::SESSION_CANCELLED, &session_id)
                .with_data(json!({"reason": reason})),
        )
        .await;
        self.mark_failed(checkpoint, failure, err).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.graph.name())
            .field("config", &self.config)
            .field("interrupts", &self.interrupts)
            .field("active_sessions", &self.active.len())
            .finish_non_exhaustive()
    }
}

/// Releases a session claim when the driving call returns.
struct ActiveGuard<'a> {
    active: &'a DashMap<SessionId, Arc<CancellationToken>>,
    session_id: SessionId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.session_id);
    }
}
