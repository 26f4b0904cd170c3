//! Stage output type with factory methods.

use super::StageStatus;
use crate::state::StateUpdate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of one stage invocation.
///
/// A successful output carries the partial state update the engine merges;
/// a failed output carries the error message and optional payload that are
/// attached to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// The partial update (empty unless the status is `Ok`).
    #[serde(default, skip_serializing_if = "StateUpdate::is_empty")]
    pub update: StateUpdate,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Structured failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Skip reason (for skipped executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok_empty()
    }
}

impl StageOutput {
    /// Creates a successful output with an update.
    #[must_use]
    pub fn ok(update: StateUpdate) -> Self {
        Self {
            status: StageStatus::Ok,
            update,
            error: None,
            details: None,
            skip_reason: None,
        }
    }

    /// Creates a successful output with no update.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::ok(StateUpdate::new())
    }

    /// Creates a successful output writing a single field.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: Value) -> Self {
        Self::ok(StateUpdate::new().set(key, value))
    }

    /// Creates a skip output with a reason.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skip,
            update: StateUpdate::new(),
            error: None,
            details: None,
            skip_reason: Some(reason.into()),
        }
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            update: StateUpdate::new(),
            error: Some(error.into()),
            details: None,
            skip_reason: None,
        }
    }

    /// Creates a failure output with a structured payload.
    #[must_use]
    pub fn fail_with_details(error: impl Into<String>, details: Value) -> Self {
        Self {
            details: Some(details),
            ..Self::fail(error)
        }
    }

    /// Returns true if the stage succeeded (ok or skipped).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == StageStatus::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_value() {
        let output = StageOutput::ok_value("score", json!(0.8));
        assert!(output.is_success());
        assert_eq!(output.update.len(), 1);
    }

    #[test]
    fn test_skip_has_no_update() {
        let output = StageOutput::skip("nothing to do");
        assert!(output.is_success());
        assert!(output.update.is_empty());
        assert_eq!(output.skip_reason.as_deref(), Some("nothing to do"));
    }

    #[test]
    fn test_fail_with_details() {
        let output = StageOutput::fail_with_details("bad row", json!({"row": 7}));
        assert!(output.is_failure());
        assert_eq!(output.error.as_deref(), Some("bad row"));
        assert_eq!(output.details, Some(json!({"row": 7})));
    }

    #[test]
    fn test_serialize_skips_empty_fields() {
        let json = serde_json::to_value(StageOutput::ok_empty()).unwrap();
        assert_eq!(json, json!({"status": "ok"}));
    }
}
