//! Stage trait and implementations.
//!
//! Stages are opaque units of work: the engine hands each one a snapshot of
//! the session state and merges the partial update it returns.

mod input;

pub use input::{FanIn, StageInput};

use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

/// Trait for graph stages.
///
/// Implementations must not keep hidden state between invocations: the engine
/// may invoke a stage several times per session (feedback cycles, fan-out
/// replication, recovery from a checkpoint) and expects identical inputs to
/// produce identical outputs.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage against a state snapshot.
    async fn execute(&self, input: &StageInput) -> StageOutput;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageInput) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInput) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageInput) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageInput) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput) -> StageOutput {
        (self.func)(input)
    }
}

/// An async function-based stage.
///
/// The closure receives an owned input so the returned future can be `'static`.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutput> + Send,
{
    name: String,
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutput> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutput> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutput> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput) -> StageOutput {
        (self.func)(input.clone()).await
    }
}

/// A stage that returns an empty update.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &StageInput) -> StageOutput {
        StageOutput::ok_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionId;
    use crate::state::State;
    use serde_json::json;

    fn test_input() -> StageInput {
        let state = State::from_value(json!({"score": 0.5})).unwrap();
        StageInput::new(SessionId::new("s1"), "test", state)
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("double", |input| {
            let score = input.state().get_f64("score").unwrap_or_default();
            StageOutput::ok_value("score", json!(score * 2.0))
        });

        assert_eq!(stage.name(), "double");

        let output = stage.execute(&test_input()).await;
        assert!(output.is_success());
        assert_eq!(output.update.to_value(), json!({"score": 1.0}));
    }

    #[tokio::test]
    async fn test_async_fn_stage() {
        let stage = AsyncFnStage::new("echo", |input: StageInput| async move {
            StageOutput::ok_value("seen", json!(input.session_id().as_str()))
        });

        let output = stage.execute(&test_input()).await;
        assert_eq!(output.update.to_value(), json!({"seen": "s1"}));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");

        assert_eq!(stage.name(), "noop");

        let output = stage.execute(&test_input()).await;
        assert!(output.is_success());
        assert!(output.update.is_empty());
    }

    #[test]
    fn test_input_accessors() {
        let input = test_input().with_child_input(json!({"i": 1}));
        assert_eq!(input.stage_name(), "test");
        assert_eq!(input.child_input(), Some(&json!({"i": 1})));
        assert!(input.fan_in().is_none());
        assert_eq!(input.get("score"), Some(&json!(0.5)));
    }
}
