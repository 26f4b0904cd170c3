//! Error types for the stagegraph engine.
//!
//! Errors fall into the classes the engine distinguishes at runtime: build
//! errors for malformed graphs, route errors for routers and dispatchers that
//! break their contract, stage failures, misuse of the session API, and
//! checkpoint storage problems. Iteration exhaustion is deliberately absent:
//! it is an event, not an error.

use crate::core::SessionStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type returned by the engine's session API.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph definition is malformed.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A router or dispatcher returned a value outside its contract.
    #[error("{0}")]
    Route(#[from] RouteError),

    /// A stage (or a fan-out round) failed.
    #[error("{0}")]
    StageFailed(#[from] StageFailure),

    /// The session was aborted while running.
    #[error("Session '{session_id}' was cancelled: {reason}")]
    Cancelled {
        /// The session id.
        session_id: String,
        /// The cancellation reason.
        reason: String,
    },

    /// `resume` was called on a session that is not paused.
    #[error("Nothing to resume: session '{session_id}' is {status}")]
    ResumeMisuse {
        /// The session id.
        session_id: String,
        /// The session's current status.
        status: SessionStatus,
    },

    /// No checkpoint exists for the session id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// `start` was called with an id that already has a checkpoint.
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// The session is currently being driven by another call.
    #[error("Session is busy: {0}")]
    SessionBusy(String),

    /// The session has completed or failed and accepts no further transitions.
    #[error("Session '{session_id}' is closed ({status})")]
    SessionClosed {
        /// The session id.
        session_id: String,
        /// The session's final status.
        status: SessionStatus,
    },

    /// The session id is not a valid identifier.
    #[error("Invalid session id: '{0}'")]
    InvalidSessionId(String),

    /// A checkpoint could not be read or written.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// Engine configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl GraphError {
    /// Returns true for errors that leave the session in a failed state.
    #[must_use]
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Self::Route(_) | Self::StageFailed(_) | Self::Cancelled { .. }
        )
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-007-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Stable codes for graph build errors.
pub mod codes {
    /// An edge points at a stage that was never registered.
    pub const DANGLING_EDGE: &str = "GRAPH-001-DANGLING_EDGE";
    /// A start, terminal or reducer declaration names an unknown stage.
    pub const UNKNOWN_STAGE: &str = "GRAPH-002-UNKNOWN_STAGE";
    /// A router can emit a label that has no target and no default exists.
    pub const NON_EXHAUSTIVE_ROUTE: &str = "GRAPH-003-NON_EXHAUSTIVE_ROUTE";
    /// No start stage was declared.
    pub const NO_START: &str = "GRAPH-004-NO_START";
    /// No terminal stage was declared.
    pub const NO_TERMINAL: &str = "GRAPH-005-NO_TERMINAL";
    /// Fan-out children disagree about their join stage.
    pub const JOIN_MISMATCH: &str = "GRAPH-006-JOIN_MISMATCH";
    /// A cycle exists that is not broken by a feedback edge.
    pub const CYCLE: &str = "GRAPH-007-CYCLE";
    /// A stage name was registered twice.
    pub const DUPLICATE_STAGE: &str = "GRAPH-008-DUPLICATE_STAGE";
    /// A stage has more than one outgoing transition.
    pub const MULTIPLE_TRANSITIONS: &str = "GRAPH-009-MULTIPLE_TRANSITIONS";
    /// A stage name or label is not a valid identifier.
    pub const INVALID_NAME: &str = "GRAPH-010-INVALID_NAME";
    /// An interrupt point is unknown or not allowed at that stage.
    pub const BAD_INTERRUPT: &str = "GRAPH-011-BAD_INTERRUPT";
    /// A non-terminal stage has no way forward.
    pub const DEAD_END: &str = "GRAPH-012-DEAD_END";
}

/// Error raised when a graph definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BuildError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl BuildError {
    /// Creates a new build error with the given code.
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ContractErrorInfo::new(code, message.clone()),
            message,
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_fix_hint(hint);
        self
    }

    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.error_info.code
    }

    /// Creates the error reported for an illegal cycle.
    #[must_use]
    pub fn cycle(cycle_path: Vec<String>) -> Self {
        Self::new(
            codes::CYCLE,
            format!(
                "graph not acyclic outside declared feedback edges: {}",
                cycle_path.join(" -> ")
            ),
        )
        .with_stages(cycle_path)
        .with_fix_hint("Mark the backward conditional route as a feedback edge, or remove it.")
    }
}

/// A router or dispatcher broke its contract at runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The router returned a label it never declared.
    #[error("Unresolved route after '{stage}': router returned undeclared label '{label}'")]
    UndeclaredLabel {
        /// The stage whose outgoing edge was being resolved.
        stage: String,
        /// The label the router returned.
        label: String,
    },

    /// The label has no target and the edge declares no default.
    #[error("Unresolved route after '{stage}': no target for label '{label}'")]
    Unresolved {
        /// The stage whose outgoing edge was being resolved.
        stage: String,
        /// The label the router returned.
        label: String,
    },

    /// The dispatcher asked for a child that is not part of the fan-out edge.
    #[error("Dispatcher after '{stage}' targeted unknown child '{child}'")]
    UnknownChild {
        /// The fan-out source stage.
        stage: String,
        /// The requested child.
        child: String,
    },

    /// The dispatcher asked for the same child more than once in one round.
    #[error("Dispatcher after '{stage}' targeted child '{child}' more than once")]
    DuplicateChild {
        /// The fan-out source stage.
        stage: String,
        /// The repeated child.
        child: String,
    },

    /// The router panicked while choosing a label.
    #[error("Router after '{stage}' panicked: {message}")]
    RouterPanicked {
        /// The stage whose outgoing edge was being resolved.
        stage: String,
        /// The panic payload.
        message: String,
    },

    /// The dispatcher panicked while computing fan-out targets.
    #[error("Dispatcher after '{stage}' panicked: {message}")]
    DispatcherPanicked {
        /// The fan-out source stage.
        stage: String,
        /// The panic payload.
        message: String,
    },

    /// A single `start`/`resume` call ran more stages than allowed.
    #[error("Step limit of {limit} exceeded at '{stage}'")]
    StepLimitExceeded {
        /// The stage that would have run next.
        stage: String,
        /// The configured limit.
        limit: u64,
    },
}

/// What kind of failure ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage reported a domain error.
    Stage,
    /// The stage exceeded its configured timeout.
    Timeout,
    /// The stage panicked.
    Panic,
    /// A fail-fast fan-out round lost a child.
    FanOut,
    /// A router or dispatcher broke its contract.
    Route,
    /// The session was aborted.
    Cancelled,
}

/// A stage-level failure, as surfaced to the caller and persisted on the session.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("Stage '{stage}' failed: {message}")]
pub struct StageFailure {
    /// The stage (or fan-out source) that failed.
    pub stage: String,
    /// What kind of failure this is.
    pub kind: FailureKind,
    /// Human readable message.
    pub message: String,
    /// Optional structured payload supplied by the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StageFailure {
    /// Creates a new failure of the given kind.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches a structured payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Builds the persisted failure for a route error.
    #[must_use]
    pub fn from_route(stage: impl Into<String>, err: &RouteError) -> Self {
        Self::new(stage, FailureKind::Route, err.to_string())
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem error.
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be (de)serialized.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored state does not match its digest.
    #[error("Checkpoint for session '{session_id}' is corrupted: digest mismatch")]
    Corrupted {
        /// The session id.
        session_id: String,
    },

    /// A stale writer tried to overwrite a newer checkpoint.
    #[error("Checkpoint conflict for session '{session_id}': stored version {stored}, attempted {attempted}")]
    Conflict {
        /// The session id.
        session_id: String,
        /// The version already stored.
        stored: u64,
        /// The version that was rejected.
        attempted: u64,
    },

    /// Any other backend failure.
    #[error("Checkpoint backend error: {0}")]
    Backend(String),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value could not be parsed or is out of range.
    #[error("Invalid configuration value for '{key}': '{value}' ({reason})")]
    Invalid {
        /// The configuration key or environment variable.
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("Configuration IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document is not valid JSON for `EngineConfig`.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
