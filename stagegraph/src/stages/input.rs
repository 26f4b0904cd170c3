//! The view of a session handed to a stage invocation.

use crate::core::SessionId;
use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Child outputs collected by a fan-out round, handed to the join stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanIn {
    /// Each successful child's update, keyed by child stage name.
    pub results: BTreeMap<String, Value>,
    /// Error messages of children that failed (best-effort rounds only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl FanIn {
    /// Returns true if no child produced a result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.failures.is_empty()
    }

    /// Returns the names of children that succeeded, in order.
    pub fn succeeded(&self) -> impl Iterator<Item = &String> {
        self.results.keys()
    }
}

/// Input to one stage invocation.
///
/// The state is a snapshot: a stage cannot observe changes made after the
/// invocation began, and fan-out children never see each other's output.
#[derive(Debug, Clone)]
pub struct StageInput {
    session_id: SessionId,
    stage: String,
    state: State,
    child_input: Option<Value>,
    fan_in: Option<FanIn>,
}

impl StageInput {
    /// Creates an input for a regular stage invocation.
    #[must_use]
    pub fn new(session_id: SessionId, stage: impl Into<String>, state: State) -> Self {
        Self {
            session_id,
            stage: stage.into(),
            state,
            child_input: None,
            fan_in: None,
        }
    }

    /// Attaches the dispatcher-provided input of a fan-out child.
    #[must_use]
    pub fn with_child_input(mut self, input: Value) -> Self {
        self.child_input = Some(input);
        self
    }

    /// Attaches the collected child results for a join stage.
    #[must_use]
    pub fn with_fan_in(mut self, fan_in: FanIn) -> Self {
        self.fan_in = Some(fan_in);
        self
    }

    /// Returns the session id.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the name of the stage being invoked.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    /// Returns the state snapshot.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Shorthand for `self.state().get(key)`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// The dispatcher-provided input, for fan-out children.
    #[must_use]
    pub fn child_input(&self) -> Option<&Value> {
        self.child_input.as_ref()
    }

    /// The collected child results, for join stages.
    #[must_use]
    pub fn fan_in(&self) -> Option<&FanIn> {
        self.fan_in.as_ref()
    }
}
