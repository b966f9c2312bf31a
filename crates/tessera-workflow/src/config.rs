//! Workflow engine configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the engine walks a workflow's dependency graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    /// One step at a time, in topological order.
    #[default]
    Sequential,
    /// Level by level; steps within a level may run concurrently.
    Parallel,
}

impl CoordinationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationStrategy::Sequential => "sequential",
            CoordinationStrategy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for CoordinationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(CoordinationStrategy::Sequential),
            "parallel" => Ok(CoordinationStrategy::Parallel),
            other => Err(format!(
                "unknown coordination strategy '{other}', expected sequential or parallel"
            )),
        }
    }
}

/// Configuration for the workflow engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Whole-run limit; exceeding it fails the workflow
    pub workflow_timeout: Duration,
    /// Largest accepted definition
    pub max_steps: usize,
    pub coordination_strategy: CoordinationStrategy,
    /// Run the steps of one level concurrently (parallel strategy only)
    pub parallel_execution: bool,
    /// Concurrency bound within a level
    pub max_parallel_agents: usize,
    pub retry_failed_steps: bool,
    /// Global cap on per-step retries
    pub max_retries: u32,
    /// Pause before a failed step is attempted again
    pub retry_delay: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workflow_timeout: Duration::from_secs(1800),
            max_steps: 100,
            coordination_strategy: CoordinationStrategy::Sequential,
            parallel_execution: true,
            max_parallel_agents: 5,
            retry_failed_steps: true,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl WorkflowConfig {
    pub fn with_strategy(mut self, strategy: CoordinationStrategy) -> Self {
        self.coordination_strategy = strategy;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }

    pub fn with_max_parallel_agents(mut self, max: usize) -> Self {
        self.max_parallel_agents = max;
        self
    }

    /// Retries allowed for a step whose own cap is `step_max`.
    pub fn retry_bound(&self, step_max: u32) -> u32 {
        if self.retry_failed_steps {
            step_max.min(self.max_retries)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Parallel".parse(), Ok(CoordinationStrategy::Parallel));
        assert_eq!(" sequential ".parse(), Ok(CoordinationStrategy::Sequential));
        assert!("round_robin".parse::<CoordinationStrategy>().is_err());
    }

    #[test]
    fn test_retry_bound() {
        let config = WorkflowConfig::default();
        assert_eq!(config.retry_bound(5), 3);
        assert_eq!(config.retry_bound(1), 1);

        let disabled = WorkflowConfig {
            retry_failed_steps: false,
            ..WorkflowConfig::default()
        };
        assert_eq!(disabled.retry_bound(5), 0);
    }
}
