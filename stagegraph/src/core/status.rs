//! Stage and session status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome status of a single stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed and produced an update.
    #[default]
    Ok,
    /// Stage chose not to do anything; its update is empty.
    Skip,
    /// Stage signalled a domain error.
    Fail,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skip => write!(f, "skip"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skip)
    }
}

/// The lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The session is executing, or was executing when its last checkpoint was written.
    #[default]
    Running,
    /// The session is halted at an interrupt point awaiting input.
    Paused,
    /// The session reached a terminal stage.
    Completed,
    /// The session stopped on an error; the last good checkpoint is kept.
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl SessionStatus {
    /// Returns true if the session accepts no further transitions.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Ok.to_string(), "ok");
        assert_eq!(StageStatus::Skip.to_string(), "skip");
        assert_eq!(StageStatus::Fail.to_string(), "fail");
    }

    #[test]
    fn test_session_status_is_closed() {
        assert!(SessionStatus::Completed.is_closed());
        assert!(SessionStatus::Failed.is_closed());
        assert!(!SessionStatus::Paused.is_closed());
        assert!(!SessionStatus::Running.is_closed());
    }

    #[test]
    fn test_session_status_serialize() {
        let json = serde_json::to_string(&SessionStatus::Paused).unwrap();
        assert_eq!(json, r#""paused""#);

        let deserialized: SessionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, SessionStatus::Paused);
    }
}
