//! The persisted checkpoint record.

use crate::core::{SessionId, SessionStatus};
use crate::errors::StageFailure;
use crate::state::State;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a session continues from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum Cursor {
    /// The named stage runs next.
    Stage(String),
    /// The fan-out round after the named source stage runs next.
    ///
    /// The source has completed; the dispatcher, children and join have not.
    FanOut(String),
    /// A terminal stage has completed.
    End,
}

impl Cursor {
    /// The stage that runs next, if the cursor points at one.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage(name) => Some(name),
            Self::FanOut(_) | Self::End => None,
        }
    }

    /// Returns true once the session has reached the end.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(name) => f.write_str(name),
            Self::FanOut(source) => write!(f, "fan_out({source})"),
            Self::End => f.write_str("__end__"),
        }
    }
}

/// A durable snapshot of one session.
///
/// Written strictly between stages: `state` includes every completed update
/// and `cursor` already names what runs next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The session this record belongs to.
    pub session_id: SessionId,
    /// Name of the graph driving the session.
    pub graph: String,
    /// The shared record.
    pub state: State,
    /// What runs next.
    pub cursor: Cursor,
    /// Feedback traversals keyed by edge id (`source->target`).
    #[serde(default)]
    pub iteration_counters: BTreeMap<String, u32>,
    /// True while paused before an interrupt point.
    #[serde(default)]
    pub interrupt_pending: bool,
    /// Session lifecycle status.
    pub status: SessionStatus,
    /// The failure that closed the session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    /// Number of stage invocations completed so far.
    #[serde(default)]
    pub step: u64,
    /// Monotonic write counter; every save increments it.
    #[serde(default)]
    pub version: u64,
    /// SHA-256 of `state` at the time of the last write.
    #[serde(default)]
    pub state_digest: String,
    /// When the session was created (RFC 3339).
    pub created_at: String,
    /// When the record was last written (RFC 3339).
    pub updated_at: String,
}

impl Checkpoint {
    /// Creates the initial record for a new session.
    #[must_use]
    pub fn new(session_id: SessionId, graph: impl Into<String>, state: State, cursor: Cursor) -> Self {
        let now = iso_timestamp();
        let state_digest = state.digest();
        Self {
            session_id,
            graph: graph.into(),
            state,
            cursor,
            iteration_counters: BTreeMap::new(),
            interrupt_pending: false,
            status: SessionStatus::Running,
            failure: None,
            step: 0,
            version: 0,
            state_digest,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Bumps the version and refreshes the digest and timestamp before a write.
    pub fn seal(&mut self) {
        self.version += 1;
        self.state_digest = self.state.digest();
        self.updated_at = iso_timestamp();
    }

    /// Returns true if `state_digest` matches `state`.
    #[must_use]
    pub fn verify_digest(&self) -> bool {
        self.state.digest() == self.state_digest
    }

    /// Traversal count for a feedback edge.
    #[must_use]
    pub fn counter(&self, edge_id: &str) -> u32 {
        self.iteration_counters.get(edge_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record() -> Checkpoint {
        let state = State::from_value(json!({"score": 0.5})).unwrap();
        Checkpoint::new(SessionId::new("s-1"), "g", state, Cursor::Stage("a".into()))
    }

    #[test]
    fn test_new_record_defaults() {
        let cp = record();
        assert_eq!(cp.version, 0);
        assert_eq!(cp.step, 0);
        assert_eq!(cp.status, SessionStatus::Running);
        assert!(!cp.interrupt_pending);
        assert!(cp.verify_digest());
        assert_eq!(cp.counter("a->b"), 0);
    }

    #[test]
    fn test_seal_bumps_version_and_digest() {
        let mut cp = record();
        cp.state.insert("score", json!(0.9));
        assert!(!cp.verify_digest());

        cp.seal();
        assert_eq!(cp.version, 1);
        assert!(cp.verify_digest());
    }

    #[test]
    fn test_cursor_layout() {
        assert_eq!(
            serde_json::to_value(Cursor::Stage("p".into())).unwrap(),
            json!({"kind": "stage", "stage": "p"})
        );
        assert_eq!(
            serde_json::to_value(Cursor::FanOut("a".into())).unwrap(),
            json!({"kind": "fan_out", "stage": "a"})
        );
        assert_eq!(serde_json::to_value(Cursor::End).unwrap(), json!({"kind": "end"}));
    }

    #[test]
    fn test_cursor_display() {
        assert_eq!(Cursor::Stage("p".into()).to_string(), "p");
        assert_eq!(Cursor::FanOut("a".into()).to_string(), "fan_out(a)");
        assert_eq!(Cursor::End.to_string(), "__end__");
        assert_eq!(Cursor::Stage("p".into()).stage(), Some("p"));
        assert!(Cursor::End.is_end());
    }

    #[test]
    fn test_record_layout() {
        let mut cp = record();
        cp.iteration_counters.insert("check->draft".into(), 2);
        let value = serde_json::to_value(&cp).unwrap();

        assert_eq!(value["session_id"], "s-1");
        assert_eq!(value["state"], json!({"score": 0.5}));
        assert_eq!(value["cursor"]["stage"], "a");
        assert_eq!(value["iteration_counters"]["check->draft"], 2);
        assert_eq!(value["interrupt_pending"], false);
        assert_eq!(value["status"], "running");
        assert!(value.get("failure").is_none());

        let back: Checkpoint = serde_json::from_value(value).unwrap();
        assert_eq!(back, cp);
    }
}
