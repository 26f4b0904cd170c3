//! Stage doubles for testing graphs.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;

use crate::core::{SessionId, StageOutput};
use crate::stages::{FanIn, Stage, StageInput};
use crate::state::{State, StateUpdate};

/// A stage that returns a fixed update.
#[derive(Debug)]
pub struct UpdateStage {
    name: String,
    update: StateUpdate,
}

impl UpdateStage {
    /// Creates a stage returning `update` on every invocation.
    #[must_use]
    pub fn new(name: impl Into<String>, update: StateUpdate) -> Self {
        Self {
            name: name.into(),
            update,
        }
    }

    /// Creates a stage writing a single field.
    #[must_use]
    pub fn value(name: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self::new(name, StateUpdate::new().set(key, value))
    }
}

#[async_trait]
impl Stage for UpdateStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &StageInput) -> StageOutput {
        StageOutput::ok(self.update.clone())
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    details: Option<Value>,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            details: None,
        }
    }

    /// Attaches a structured payload to the failure.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &StageInput) -> StageOutput {
        match &self.details {
            Some(details) => StageOutput::fail_with_details(&self.error, details.clone()),
            None => StageOutput::fail(&self.error),
        }
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    update: StateUpdate,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            update: StateUpdate::new(),
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Sets the update returned once the delay has elapsed.
    #[must_use]
    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.update = update;
        self
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &StageInput) -> StageOutput {
        tokio::time::sleep(self.delay).await;
        StageOutput::ok(self.update.clone())
    }
}

/// A stage that panics.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
}

impl PanickingStage {
    /// Creates a new panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn execute(&self, _input: &StageInput) -> StageOutput {
        panic!("stage '{}' panicked", self.name)
    }
}

/// A stage that records every input it receives.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    update: StateUpdate,
    executions: Mutex<Vec<RecordedInput>>,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedInput {
    /// Session the invocation belonged to.
    pub session_id: SessionId,
    /// State snapshot handed to the stage.
    pub state: State,
    /// Dispatcher input, for fan-out children.
    pub child_input: Option<Value>,
    /// Collected child outputs, for join stages.
    pub fan_in: Option<FanIn>,
}

impl RecordingStage {
    /// Creates a new recording stage that returns an empty update.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            update: StateUpdate::new(),
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Sets the update returned by every invocation.
    #[must_use]
    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.update = update;
        self
    }

    /// Returns all recorded inputs.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedInput> {
        self.executions.lock().clone()
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }

    /// Returns the most recent input, if any.
    #[must_use]
    pub fn last(&self) -> Option<RecordedInput> {
        self.executions.lock().last().cloned()
    }

    /// Clears recorded executions.
    pub fn clear(&self) {
        self.executions.lock().clear();
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput) -> StageOutput {
        self.executions.lock().push(RecordedInput {
            session_id: input.session_id().clone(),
            state: input.state().clone(),
            child_input: input.child_input().cloned(),
            fan_in: input.fan_in().cloned(),
        });
        StageOutput::ok(self.update.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use serde_json::json;

    fn input(name: &str) -> StageInput {
        let state = State::from_value(json!({"score": 0.5})).unwrap();
        StageInput::new(SessionId::new("s-1"), name, state)
    }

    #[tokio::test]
    async fn test_update_stage() {
        let stage = UpdateStage::value("a", "done", json!(true));
        let output = stage.execute(&input("a")).await;
        assert!(output.is_success());
        assert_eq!(output.update.get("done").map(|w| w.value()), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let stage = FailingStage::new("fail", "bad input").with_details(json!({"field": "x"}));
        let output = stage.execute(&input("fail")).await;
        assert_eq!(output.status, StageStatus::Fail);
        assert_eq!(output.error.as_deref(), Some("bad input"));
        assert_eq!(output.details, Some(json!({"field": "x"})));
    }

    #[tokio::test]
    async fn test_slow_stage() {
        let stage = SlowStage::with_delay_ms("slow", 10);
        let start = std::time::Instant::now();
        let output = stage.execute(&input("slow")).await;
        assert!(output.is_success());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_recording_stage() {
        let stage = RecordingStage::new("rec").with_update(StateUpdate::new().set("seen", json!(1)));
        assert_eq!(stage.execution_count(), 0);

        let output = stage
            .execute(&input("rec").with_child_input(json!({"item": 3})))
            .await;
        assert!(output.is_success());
        assert_eq!(stage.execution_count(), 1);

        let last = stage.last().unwrap();
        assert_eq!(last.session_id.as_str(), "s-1");
        assert_eq!(last.state.get_f64("score"), Some(0.5));
        assert_eq!(last.child_input, Some(json!({"item": 3})));
        assert!(last.fan_in.is_none());

        stage.clear();
        assert_eq!(stage.execution_count(), 0);
    }
}
