//! Engine configuration.

use crate::errors::ConfigError;
use crate::pipeline::FanOutPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`EngineConfig::max_feedback_iterations`].
pub const ENV_MAX_ITERATIONS: &str = "STAGEGRAPH_MAX_ITERATIONS";
/// Environment variable overriding [`EngineConfig::stage_timeout_ms`].
pub const ENV_STAGE_TIMEOUT_MS: &str = "STAGEGRAPH_STAGE_TIMEOUT_MS";
/// Environment variable overriding [`EngineConfig::fan_out_policy`].
pub const ENV_FAN_OUT_POLICY: &str = "STAGEGRAPH_FAN_OUT_POLICY";
/// Environment variable overriding [`EngineConfig::fan_out_concurrency`].
pub const ENV_FAN_OUT_CONCURRENCY: &str = "STAGEGRAPH_FAN_OUT_CONCURRENCY";
/// Environment variable overriding [`EngineConfig::interrupt_before`] (comma-separated).
pub const ENV_INTERRUPT_BEFORE: &str = "STAGEGRAPH_INTERRUPT_BEFORE";
/// Environment variable overriding [`EngineConfig::max_steps`].
pub const ENV_MAX_STEPS: &str = "STAGEGRAPH_MAX_STEPS";

/// Runtime knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default traversal budget for every feedback edge.
    #[serde(default = "default_max_feedback_iterations")]
    pub max_feedback_iterations: u32,
    /// Per-edge budgets keyed by edge id (`source->target`).
    #[serde(default)]
    pub feedback_limits: BTreeMap<String, u32>,
    /// Default stage timeout in milliseconds. `None` waits forever.
    #[serde(default)]
    pub stage_timeout_ms: Option<u64>,
    /// Per-stage timeouts in milliseconds.
    #[serde(default)]
    pub stage_timeouts: BTreeMap<String, u64>,
    /// Policy for fan-out edges that do not declare their own.
    #[serde(default)]
    pub fan_out_policy: FanOutPolicy,
    /// Maximum fan-out children running at once. `None` is unbounded.
    #[serde(default)]
    pub fan_out_concurrency: Option<usize>,
    /// Stages to pause before, in addition to those declared on the graph.
    #[serde(default)]
    pub interrupt_before: Vec<String>,
    /// Maximum stage invocations per `start`/`resume` call.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
}

fn default_max_feedback_iterations() -> u32 {
    3
}

fn default_max_steps() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_feedback_iterations: default_max_feedback_iterations(),
            feedback_limits: BTreeMap::new(),
            stage_timeout_ms: None,
            stage_timeouts: BTreeMap::new(),
            fan_out_policy: FanOutPolicy::default(),
            fan_out_concurrency: None,
            interrupt_before: Vec::new(),
            max_steps: default_max_steps(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Defaults overlaid with the `STAGEGRAPH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env_with(|key| std::env::var(key).ok())
    }

    /// Overlays values returned by `lookup` for each `STAGEGRAPH_*` key.
    pub fn overlay_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_feedback_iterations = parse_number(ENV_MAX_ITERATIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STAGE_TIMEOUT_MS) {
            self.stage_timeout_ms = Some(parse_number(ENV_STAGE_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_FAN_OUT_POLICY) {
            self.fan_out_policy = raw
                .parse()
                .map_err(|reason: String| ConfigError::invalid(ENV_FAN_OUT_POLICY, &raw, reason))?;
        }
        if let Some(raw) = lookup(ENV_FAN_OUT_CONCURRENCY) {
            self.fan_out_concurrency = Some(parse_number(ENV_FAN_OUT_CONCURRENCY, &raw)?);
        }
        if let Some(raw) = lookup(ENV_INTERRUPT_BEFORE) {
            self.interrupt_before = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            self.max_steps = parse_number(ENV_MAX_STEPS, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::invalid("max_steps", "0", "must be at least 1"));
        }
        if self.fan_out_concurrency == Some(0) {
            return Err(ConfigError::invalid(
                "fan_out_concurrency",
                "0",
                "must be at least 1",
            ));
        }
        if self.stage_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("stage_timeout_ms", "0", "must be positive"));
        }
        if let Some((stage, _)) = self.stage_timeouts.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::invalid(
                format!("stage_timeouts.{stage}"),
                "0",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Sets the default feedback budget.
    #[must_use]
    pub fn with_max_feedback_iterations(mut self, max: u32) -> Self {
        self.max_feedback_iterations = max;
        self
    }

    /// Sets the budget for one feedback edge.
    #[must_use]
    pub fn with_feedback_limit(mut self, edge_id: impl Into<String>, max: u32) -> Self {
        self.feedback_limits.insert(edge_id.into(), max);
        self
    }

    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Sets the timeout for one stage.
    #[must_use]
    pub fn with_stage_timeout_for(mut self, stage: impl Into<String>, timeout: Duration) -> Self {
        self.stage_timeouts.insert(stage.into(), duration_ms(timeout));
        self
    }

    /// Sets the default fan-out policy.
    #[must_use]
    pub fn with_fan_out_policy(mut self, policy: FanOutPolicy) -> Self {
        self.fan_out_policy = policy;
        self
    }

    /// Caps concurrently running fan-out children.
    #[must_use]
    pub fn with_fan_out_concurrency(mut self, max: usize) -> Self {
        self.fan_out_concurrency = Some(max);
        self
    }

    /// Adds an interrupt point.
    #[must_use]
    pub fn with_interrupt_before(mut self, stage: impl Into<String>) -> Self {
        self.interrupt_before.push(stage.into());
        self
    }

    /// Sets the per-call step limit.
    #[must_use]
    pub fn with_max_steps(mut self, max: u64) -> Self {
        self.max_steps = max;
        self
    }

    /// Resolves the feedback budget for an edge.
    ///
    /// A per-edge config entry wins over the edge's own declaration, which wins
    /// over the engine default.
    #[must_use]
    pub fn feedback_limit(&self, edge_id: &str, declared: Option<u32>) -> u32 {
        self.feedback_limits
            .get(edge_id)
            .copied()
            .or(declared)
            .unwrap_or(self.max_feedback_iterations)
    }

    /// Resolves the timeout for a stage.
    ///
    /// A per-stage config entry wins over the stage's own declaration, which
    /// wins over the engine default.
    #[must_use]
    pub fn stage_timeout(&self, stage: &str, declared: Option<Duration>) -> Option<Duration> {
        self.stage_timeouts
            .get(stage)
            .map(|ms| Duration::from_millis(*ms))
            .or(declared)
            .or_else(|| self.stage_timeout_ms.map(Duration::from_millis))
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::invalid(key, raw, err.to_string()))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
