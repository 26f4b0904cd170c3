//! Engine events for observability.
//!
//! The engine reports every lifecycle step of a session to an [`EventSink`].
//! Events complement the `tracing` logs: logs are for operators, events are a
//! structured feed that callers can assert on or forward elsewhere.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::SessionId;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type names emitted by the engine.
pub mod event_types {
    /// A new session began.
    pub const SESSION_STARTED: &str = "session.started";
    /// A stage is about to run.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage returned successfully.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed, timed out or panicked.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A conditional edge selected its next stage.
    pub const ROUTE_SELECTED: &str = "route.selected";
    /// A feedback edge ran out of iterations and the exit label was forced.
    pub const FEEDBACK_EXHAUSTED: &str = "feedback.exhausted";
    /// A fan-out round dispatched its children.
    pub const FANOUT_STARTED: &str = "fanout.started";
    /// A fan-out child failed.
    pub const FANOUT_CHILD_FAILED: &str = "fanout.child_failed";
    /// A fan-out round finished at its join stage.
    pub const FANOUT_JOINED: &str = "fanout.joined";
    /// A checkpoint was persisted.
    pub const CHECKPOINT_SAVED: &str = "checkpoint.saved";
    /// The session paused at an interrupt point.
    pub const SESSION_PAUSED: &str = "session.paused";
    /// A paused session was resumed.
    pub const SESSION_RESUMED: &str = "session.resumed";
    /// The session reached a terminal stage.
    pub const SESSION_COMPLETED: &str = "session.completed";
    /// The session was marked failed.
    pub const SESSION_FAILED: &str = "session.failed";
    /// The session was aborted.
    pub const SESSION_CANCELLED: &str = "session.cancelled";
}

/// A structured engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Event type, one of [`event_types`].
    pub event_type: String,
    /// The session the event belongs to.
    pub session_id: SessionId,
    /// The stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Event-specific payload.
    #[serde(default)]
    pub data: Value,
    /// When the event was created (RFC 3339).
    pub timestamp: String,
}

impl EngineEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>, session_id: &SessionId) -> Self {
        Self {
            event_type: event_type.into(),
            session_id: session_id.clone(),
            stage: None,
            data: Value::Null,
            timestamp: iso_timestamp(),
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let event = EngineEvent::new(event_types::ROUTE_SELECTED, &SessionId::new("s-1"))
            .with_stage("check")
            .with_data(json!({"label": "revise", "target": "draft"}));

        assert_eq!(event.event_type, "route.selected");
        assert_eq!(event.session_id.as_str(), "s-1");
        assert_eq!(event.stage.as_deref(), Some("check"));
        assert_eq!(event.data["target"], "draft");
        assert!(!event.timestamp.is_empty());
    }

    #[test]
    fn test_event_serialization_omits_missing_stage() {
        let event = EngineEvent::new(event_types::SESSION_STARTED, &SessionId::new("s-1"));
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("stage").is_none());
        assert_eq!(value["session_id"], "s-1");
    }
}
