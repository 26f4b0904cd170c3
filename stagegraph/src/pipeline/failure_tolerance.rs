//! Failure handling for fan-out rounds.
//!
//! A round either stops at its first child failure (fail-fast, all-or-nothing)
//! or lets every child finish and hands the survivors to the join stage
//! (best-effort).

use crate::errors::FailureKind;
use crate::stages::FanIn;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How a fan-out round treats child failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Any child failure aborts the round; the join stage never runs.
    FailFast,
    /// Wait for every child; the join sees successes and failures.
    #[default]
    BestEffort,
}

impl fmt::Display for FanOutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

impl FromStr for FanOutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown fan-out policy '{other}'")),
        }
    }
}

/// Record of a child failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Child stage name.
    pub stage: String,
    /// Error message.
    pub error: String,
    /// What went wrong.
    pub kind: FailureKind,
    /// When the failure was observed.
    pub timestamp: String,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: error.into(),
            kind,
            timestamp: iso_timestamp(),
        }
    }
}

/// Collects child outcomes for one fan-out round.
#[derive(Debug)]
pub struct FailureCollector {
    /// Policy for this round.
    pub policy: FanOutPolicy,
    results: BTreeMap<String, Value>,
    failures: Vec<FailureRecord>,
}

impl FailureCollector {
    /// Creates a new collector.
    #[must_use]
    pub fn new(policy: FanOutPolicy) -> Self {
        Self {
            policy,
            results: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// Records a child's update.
    pub fn record_success(&mut self, stage: impl Into<String>, update: Value) {
        self.results.insert(stage.into(), update);
    }

    /// Records a child failure.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failures.push(record);
    }

    /// Returns true if remaining children should be abandoned.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        match self.policy {
            FanOutPolicy::FailFast => !self.failures.is_empty(),
            FanOutPolicy::BestEffort => false,
        }
    }

    /// Returns true if any child failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns all failures, in the order observed.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Number of children that completed successfully.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    /// Converts the collected outcomes into the join stage's input.
    #[must_use]
    pub fn into_fan_in(self) -> FanIn {
        FanIn {
            results: self.results,
            failures: self
                .failures
                .into_iter()
                .map(|f| (f.stage, f.error))
                .collect(),
        }
    }
}

impl Default for FailureCollector {
    fn default() -> Self {
        Self::new(FanOutPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_policy_parse() {
        assert_eq!("fail_fast".parse::<FanOutPolicy>(), Ok(FanOutPolicy::FailFast));
        assert_eq!("Best-Effort".parse::<FanOutPolicy>(), Ok(FanOutPolicy::BestEffort));
        assert!("sometimes".parse::<FanOutPolicy>().is_err());
        assert_eq!(FanOutPolicy::FailFast.to_string(), "fail_fast");
    }

    #[test]
    fn test_fail_fast_stops_on_first_failure() {
        let mut collector = FailureCollector::new(FanOutPolicy::FailFast);
        collector.record_success("x", json!({"a": 1}));
        assert!(!collector.should_stop());

        collector.record_failure(FailureRecord::new("y", FailureKind::Stage, "boom"));
        assert!(collector.should_stop());
    }

    #[test]
    fn test_best_effort_keeps_partial_results() {
        let mut collector = FailureCollector::new(FanOutPolicy::BestEffort);
        collector.record_success("x", json!({"a": 1}));
        collector.record_failure(FailureRecord::new("y", FailureKind::Timeout, "slow"));
        assert!(!collector.should_stop());
        assert!(collector.has_failures());

        let fan_in = collector.into_fan_in();
        assert_eq!(fan_in.results.len(), 1);
        assert_eq!(fan_in.failures.get("y").map(String::as_str), Some("slow"));
    }
}
