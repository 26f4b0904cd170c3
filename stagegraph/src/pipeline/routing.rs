//! Router and dispatcher contracts.

use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decides which label a conditional edge follows.
///
/// `labels` is the router's declared contract: `route` must only ever return
/// one of them, and the graph builder checks that every declared label is
/// mapped to a stage (or that the edge has a default).
pub trait Router: Send + Sync {
    /// The full set of labels this router may return.
    fn labels(&self) -> Vec<String>;

    /// Inspects the state and returns a label.
    fn route(&self, state: &State) -> String;
}

/// A router backed by a closure.
pub struct FnRouter<F>
where
    F: Fn(&State) -> String + Send + Sync,
{
    labels: Vec<String>,
    func: F,
}

impl<F> FnRouter<F>
where
    F: Fn(&State) -> String + Send + Sync,
{
    /// Creates a router declaring `labels`.
    pub fn new(labels: &[&str], func: F) -> Self {
        Self {
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            func,
        }
    }
}

impl<F> Router for FnRouter<F>
where
    F: Fn(&State) -> String + Send + Sync,
{
    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn route(&self, state: &State) -> String {
        (self.func)(state)
    }
}

/// Routes on a numeric field compared against a threshold.
///
/// A value exactly at the threshold passes. Missing or non-numeric fields
/// count as `0.0`.
#[derive(Debug, Clone)]
pub struct ThresholdRouter {
    field: String,
    threshold: f64,
    below: String,
    at_or_above: String,
}

impl ThresholdRouter {
    /// Creates a threshold router.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        threshold: f64,
        below: impl Into<String>,
        at_or_above: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            threshold,
            below: below.into(),
            at_or_above: at_or_above.into(),
        }
    }
}

impl Router for ThresholdRouter {
    fn labels(&self) -> Vec<String> {
        vec![self.below.clone(), self.at_or_above.clone()]
    }

    fn route(&self, state: &State) -> String {
        let value = state.get_f64(&self.field).unwrap_or(0.0);
        if value >= self.threshold {
            self.at_or_above.clone()
        } else {
            self.below.clone()
        }
    }
}

/// One child invocation requested by a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutTarget {
    /// The child stage to run.
    pub stage: String,
    /// Input handed to the child alongside the state snapshot.
    #[serde(default)]
    pub input: Value,
}

impl FanOutTarget {
    /// Creates a fan-out target.
    #[must_use]
    pub fn new(stage: impl Into<String>, input: Value) -> Self {
        Self {
            stage: stage.into(),
            input,
        }
    }
}

/// Produces the children of a fan-out round from the current state.
pub trait Dispatcher: Send + Sync {
    /// Returns zero or more child invocations.
    fn dispatch(&self, state: &State) -> Vec<FanOutTarget>;
}

impl<F> Dispatcher for F
where
    F: Fn(&State) -> Vec<FanOutTarget> + Send + Sync,
{
    fn dispatch(&self, state: &State) -> Vec<FanOutTarget> {
        self(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(score: f64) -> State {
        State::from_value(json!({"score": score})).unwrap()
    }

    #[test]
    fn test_threshold_router() {
        let router = ThresholdRouter::new("score", 0.75, "B", "C");
        assert_eq!(router.route(&state(0.5)), "B");
        assert_eq!(router.route(&state(0.9)), "C");
        assert_eq!(router.labels(), vec!["B", "C"]);
    }

    #[test]
    fn test_threshold_tie_passes() {
        let router = ThresholdRouter::new("score", 0.75, "fail", "pass");
        assert_eq!(router.route(&state(0.75)), "pass");
    }

    #[test]
    fn test_threshold_missing_field_counts_as_zero() {
        let router = ThresholdRouter::new("score", 0.0, "below", "above");
        assert_eq!(router.route(&State::new()), "above");

        let router = ThresholdRouter::new("score", 0.1, "below", "above");
        assert_eq!(router.route(&State::new()), "below");
    }

    #[test]
    fn test_fn_router() {
        let router = FnRouter::new(&["yes", "no"], |s: &State| {
            if s.get_bool("approved").unwrap_or(false) {
                "yes".to_string()
            } else {
                "no".to_string()
            }
        });
        let approved = State::from_value(json!({"approved": true})).unwrap();
        assert_eq!(router.route(&approved), "yes");
        assert_eq!(router.route(&State::new()), "no");
    }

    #[test]
    fn test_closure_dispatcher() {
        let dispatcher = |s: &State| -> Vec<FanOutTarget> {
            s.get("active")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|n| FanOutTarget::new(n, Value::Null))
                        .collect()
                })
                .unwrap_or_default()
        };

        let s = State::from_value(json!({"active": ["x", "y"]})).unwrap();
        let targets = dispatcher.dispatch(&s);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].stage, "y");
        assert!(dispatcher.dispatch(&State::new()).is_empty());
    }
}
