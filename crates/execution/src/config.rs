//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskpilot_core::PlanDefaults;
use taskpilot_tools::SelectionStrategy;

/// Configuration for the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tool timeout is `time_estimate_ms * timeout_multiplier`...
    pub timeout_multiplier: u64,

    /// ...but never less than this
    pub timeout_floor_ms: u64,

    /// Retry budget for plan steps that omit one
    pub default_max_retries: u32,

    /// Replan budget for plans that omit one
    pub default_max_replans: u32,

    /// How to pick a tool for steps that name none
    pub selection_strategy: SelectionStrategy,

    /// Max concurrent workers per parallel batch
    pub max_parallel: usize,

    /// Event channel capacity
    pub event_capacity: usize,

    /// Driver loop iteration bound
    pub max_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_multiplier: 10,
            timeout_floor_ms: 30_000,
            default_max_retries: 3,
            default_max_replans: 2,
            selection_strategy: SelectionStrategy::BestFit,
            max_parallel: 8,
            event_capacity: 1024,
            max_iterations: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout multiplier and floor.
    pub fn with_timeouts(mut self, multiplier: u64, floor_ms: u64) -> Self {
        self.timeout_multiplier = multiplier;
        self.timeout_floor_ms = floor_ms;
        self
    }

    /// Set the default retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Set the default replan budget.
    pub fn with_max_replans(mut self, max_replans: u32) -> Self {
        self.default_max_replans = max_replans;
        self
    }

    /// Set the selection strategy.
    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.selection_strategy = strategy;
        self
    }

    /// Set the parallel batch width.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Set the driver loop bound.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Timeout for one invocation of a tool with the given estimate.
    pub fn tool_timeout(&self, time_estimate_ms: u64) -> Duration {
        let scaled = time_estimate_ms.saturating_mul(self.timeout_multiplier);
        Duration::from_millis(scaled.max(self.timeout_floor_ms))
    }

    /// Budgets applied when ingesting plans.
    pub fn plan_defaults(&self) -> PlanDefaults {
        PlanDefaults {
            max_retries: self.default_max_retries,
            max_replans: self.default_max_replans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_timeout_has_floor() {
        let config = EngineConfig::default();
        assert_eq!(config.tool_timeout(100), Duration::from_secs(30));
        assert_eq!(config.tool_timeout(10_000), Duration::from_secs(100));
        assert_eq!(config.tool_timeout(u64::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_parallel": 2, "selection_strategy": "FASTEST"}"#).unwrap();
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.selection_strategy, SelectionStrategy::Fastest);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.timeout_floor_ms, 30_000);
    }
}
