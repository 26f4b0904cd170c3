//! Stage and edge specifications.

use super::failure_tolerance::FanOutPolicy;
use super::routing::{Dispatcher, FanOutTarget, Router};
use crate::stages::Stage;
use crate::state::State;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Specification for a single stage in a graph.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Timeout declared with the stage; engine configuration may override it.
    pub timeout: Option<Duration>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            timeout: None,
        }
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Marks one label of a conditional edge as a bounded backward route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackSpec {
    /// The label whose target loops back to an earlier stage.
    pub label: String,
    /// The label forced once the iteration budget is spent.
    pub exit_label: String,
    /// Iteration budget declared on the edge.
    pub max_iterations: Option<u32>,
}

/// A conditional edge: a router plus its label map.
#[derive(Clone)]
pub struct ConditionalEdge {
    pub(crate) router: Arc<dyn Router>,
    pub(crate) routes: BTreeMap<String, String>,
    pub(crate) default: Option<String>,
    pub(crate) feedback: Option<FeedbackSpec>,
    max_iterations: Option<u32>,
}

impl ConditionalEdge {
    /// Creates a conditional edge driven by `router`.
    pub fn new(router: impl Router + 'static) -> Self {
        Self {
            router: Arc::new(router),
            routes: BTreeMap::new(),
            default: None,
            feedback: None,
            max_iterations: None,
        }
    }

    /// Maps a label to its target stage.
    #[must_use]
    pub fn route(mut self, label: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.insert(label.into(), target.into());
        self
    }

    /// Target for declared labels that have no explicit mapping.
    #[must_use]
    pub fn default_to(mut self, target: impl Into<String>) -> Self {
        self.default = Some(target.into());
        self
    }

    /// Declares `label` a feedback edge; `exit_label` is forced once the budget is spent.
    #[must_use]
    pub fn feedback(mut self, label: impl Into<String>, exit_label: impl Into<String>) -> Self {
        self.feedback = Some(FeedbackSpec {
            label: label.into(),
            exit_label: exit_label.into(),
            max_iterations: self.max_iterations,
        });
        self
    }

    /// Sets the iteration budget of the feedback edge.
    ///
    /// May be called before or after [`ConditionalEdge::feedback`]; it is
    /// ignored when the edge never declares a feedback label.
    #[must_use]
    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        if let Some(feedback) = self.feedback.as_mut() {
            feedback.max_iterations = Some(max);
        }
        self
    }

    /// Labels the router declares.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.router.labels()
    }

    /// Resolves a label to a target without consulting the router.
    #[must_use]
    pub fn target_for(&self, label: &str) -> Option<&str> {
        self.routes
            .get(label)
            .or(self.default.as_ref())
            .map(String::as_str)
    }

    /// Runs the router.
    #[must_use]
    pub fn evaluate(&self, state: &State) -> String {
        self.router.route(state)
    }

    /// Every stage this edge can lead to.
    pub fn targets(&self) -> impl Iterator<Item = &String> {
        self.routes.values().chain(self.default.iter())
    }

    /// The feedback declaration, if any.
    #[must_use]
    pub fn feedback_spec(&self) -> Option<&FeedbackSpec> {
        self.feedback.as_ref()
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("labels", &self.router.labels())
            .field("routes", &self.routes)
            .field("default", &self.default)
            .field("feedback", &self.feedback)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

/// A dynamic fan-out edge: a dispatcher, the children it may target, and the join.
#[derive(Clone)]
pub struct FanOutEdge {
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) children: Vec<String>,
    pub(crate) join: String,
    pub(crate) policy: Option<FanOutPolicy>,
}

impl FanOutEdge {
    /// Creates a fan-out edge whose children converge at `join`.
    pub fn new<I, S>(dispatcher: impl Dispatcher + 'static, children: I, join: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dispatcher: Arc::new(dispatcher),
            children: children.into_iter().map(Into::into).collect(),
            join: join.into(),
            policy: None,
        }
    }

    /// Overrides the engine's fan-out policy for this edge.
    #[must_use]
    pub fn policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Runs the dispatcher.
    #[must_use]
    pub fn dispatch(&self, state: &State) -> Vec<FanOutTarget> {
        self.dispatcher.dispatch(state)
    }

    /// The children this edge may dispatch.
    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// The join stage.
    #[must_use]
    pub fn join(&self) -> &str {
        &self.join
    }

    /// The per-edge policy override.
    #[must_use]
    pub fn policy_override(&self) -> Option<FanOutPolicy> {
        self.policy
    }
}

impl fmt::Debug for FanOutEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutEdge")
            .field("children", &self.children)
            .field("join", &self.join)
            .field("policy", &self.policy)
            .finish()
    }
}

/// The outgoing transition of a stage.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Unconditional "after A run B".
    Fixed(String),
    /// Router-selected next stage.
    Conditional(ConditionalEdge),
    /// Runtime-computed parallel children converging at a join stage.
    FanOut(FanOutEdge),
}

impl Transition {
    /// Returns a short name for the transition kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "fixed",
            Self::Conditional(_) => "conditional",
            Self::FanOut(_) => "fan_out",
        }
    }
}

/// Identifier of the edge `source -> target`, used to key iteration counters.
#[must_use]
pub fn edge_id(source: &str, target: &str) -> String {
    format!("{source}->{target}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::routing::ThresholdRouter;

    #[test]
    fn test_conditional_edge_targets() {
        let edge = ConditionalEdge::new(ThresholdRouter::new("score", 0.5, "low", "high"))
            .route("low", "B")
            .default_to("C");

        assert_eq!(edge.target_for("low"), Some("B"));
        assert_eq!(edge.target_for("high"), Some("C"));
        let targets: Vec<_> = edge.targets().cloned().collect();
        assert_eq!(targets, vec!["B", "C"]);
    }

    #[test]
    fn test_feedback_budget_order_independent() {
        let edge = ConditionalEdge::new(ThresholdRouter::new("score", 0.5, "fail", "pass"))
            .feedback("fail", "pass")
            .max_iterations(2);
        assert_eq!(edge.feedback_spec().unwrap().max_iterations, Some(2));

        let edge = ConditionalEdge::new(ThresholdRouter::new("score", 0.5, "fail", "pass"))
            .max_iterations(2)
            .feedback("fail", "pass");
        assert_eq!(edge.feedback_spec().unwrap().max_iterations, Some(2));

        let edge = ConditionalEdge::new(ThresholdRouter::new("score", 0.5, "fail", "pass"))
            .max_iterations(2);
        assert!(edge.feedback_spec().is_none());
    }

    #[test]
    fn test_edge_id() {
        assert_eq!(edge_id("compliance", "feedback"), "compliance->feedback");
    }
}
