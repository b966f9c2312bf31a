//! # Environment-Based Configuration
//!
//! Layered configuration for an orchestration context: defaults, then
//! `TESSERA_*` environment variables, then validation in [`OrchestratorConfigBuilder::build`].
//!
//! ## Environment Variables
//!
//! ### Registry
//! - `TESSERA_HEALTH_CHECK_INTERVAL_SECS` - Health loop period (default: 60)
//! - `TESSERA_HEALTH_CHECK_TIMEOUT_SECS` - Agents are stale after twice this (default: 10)
//! - `TESSERA_DISCOVERY_ENABLED` - Run the discovery loop (default: true)
//! - `TESSERA_DISCOVERY_INTERVAL_SECS` - Discovery loop period (default: 30)
//! - `TESSERA_LOOP_BACKOFF_MS` - Pause after a failed loop iteration (default: 1000)
//!
//! ### Router
//! - `TESSERA_MESSAGE_MAX_SIZE` - Largest JSON content in bytes (default: 1048576)
//! - `TESSERA_MESSAGE_TIMEOUT_SECS` - Executor timeout, 0 disables it (default: 30)
//!
//! ### Workflows
//! - `TESSERA_WORKFLOW_TIMEOUT_SECS` - Whole-run limit (default: 1800)
//! - `TESSERA_WORKFLOW_MAX_STEPS` - Largest accepted definition (default: 100)
//! - `TESSERA_COORDINATION_STRATEGY` - `sequential` or `parallel` (default: sequential)
//! - `TESSERA_PARALLEL_EXECUTION` - Run a level's steps concurrently (default: true)
//! - `TESSERA_MAX_PARALLEL_AGENTS` - Concurrency bound within a level (default: 5)
//! - `TESSERA_RETRY_FAILED_STEPS` - Retry failed steps (default: true)
//! - `TESSERA_MAX_RETRIES` - Global per-step retry cap (default: 3)
//! - `TESSERA_RETRY_DELAY_MS` - Delay between step attempts (default: 5000)
//!
//! ### Cache
//! - `TESSERA_REDIS_URL` - Redis URL; unset means in-memory state
//! - `TESSERA_REDIS_POOL_SIZE` - Connection pool size (default: 10)
//! - `TESSERA_CACHE_PREFIX` - Key prefix (default: "acp:")
//!
//! ### Telemetry
//! - `TESSERA_LOG_LEVEL` - trace, debug, info, warn, error or off (default: info)
//! - `TESSERA_LOG_FORMAT` - `json` or `pretty` (default: json)

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tessera_agent::{RegistryConfig, RouterConfig};
use tessera_cache::DEFAULT_PREFIX;
use tessera_workflow::{CoordinationStrategy, WorkflowConfig};

const ENV_PREFIX: &str = "TESSERA_";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

// ============================================================================
// Sections
// ============================================================================

/// Where shared state lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Redis URL; `None` keeps state in process memory
    pub redis_url: Option<String>,
    pub pool_size: usize,
    pub prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            pool_size: 10,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Log output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}', expected json or pretty")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

/// Complete configuration of one orchestration context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratorConfig {
    pub registry: RegistryConfig,
    pub router: RouterConfig,
    pub workflow: WorkflowConfig,
    pub cache: CacheSettings,
    pub telemetry: TelemetryConfig,
}

impl OrchestratorConfig {
    /// Defaults overlaid with `TESSERA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        OrchestratorConfigBuilder::from_env()?.build()
    }

    /// Effective settings as JSON, durations in their configured unit.
    pub fn summary(&self) -> Value {
        let backend = match self.cache.redis_url {
            Some(_) => "redis",
            None => "memory",
        };
        json!({
            "registry": {
                "health_check_interval_secs": self.registry.health_check_interval.as_secs(),
                "health_check_timeout_secs": self.registry.health_check_timeout.as_secs(),
                "discovery_enabled": self.registry.discovery_enabled,
                "discovery_interval_secs": self.registry.discovery_interval.as_secs(),
                "loop_backoff_ms": self.registry.loop_backoff.as_millis() as u64,
            },
            "router": {
                "message_max_size": self.router.message_max_size,
                "message_timeout_secs": self.router.executor_timeout.map(|t| t.as_secs()),
                "capability_mappings": self.router.capability_map.len(),
            },
            "workflow": {
                "workflow_timeout_secs": self.workflow.workflow_timeout.as_secs(),
                "max_steps": self.workflow.max_steps,
                "coordination_strategy": self.workflow.coordination_strategy,
                "parallel_execution": self.workflow.parallel_execution,
                "max_parallel_agents": self.workflow.max_parallel_agents,
                "retry_failed_steps": self.workflow.retry_failed_steps,
                "max_retries": self.workflow.max_retries,
                "retry_delay_ms": self.workflow.retry_delay.as_millis() as u64,
            },
            "cache": {
                "backend": backend,
                "pool_size": self.cache.pool_size,
                "prefix": self.cache.prefix,
            },
            "telemetry": self.telemetry,
        })
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`OrchestratorConfig`] with environment variable support
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which receives full variable
    /// names such as `TESSERA_MAX_RETRIES`.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvVars { lookup: &lookup };
        let mut config = OrchestratorConfig::default();

        // Registry
        if let Some(secs) = vars.u64("HEALTH_CHECK_INTERVAL_SECS")? {
            config.registry.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = vars.u64("HEALTH_CHECK_TIMEOUT_SECS")? {
            config.registry.health_check_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = vars.bool("DISCOVERY_ENABLED")? {
            config.registry.discovery_enabled = enabled;
        }
        if let Some(secs) = vars.u64("DISCOVERY_INTERVAL_SECS")? {
            config.registry.discovery_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = vars.u64("LOOP_BACKOFF_MS")? {
            config.registry.loop_backoff = Duration::from_millis(ms);
        }

        // Router
        if let Some(size) = vars.usize("MESSAGE_MAX_SIZE")? {
            config.router.message_max_size = size;
        }
        if let Some(secs) = vars.u64("MESSAGE_TIMEOUT_SECS")? {
            config.router.executor_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        // Workflows
        if let Some(secs) = vars.u64("WORKFLOW_TIMEOUT_SECS")? {
            config.workflow.workflow_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = vars.usize("WORKFLOW_MAX_STEPS")? {
            config.workflow.max_steps = max;
        }
        if let Some(strategy) = vars.parse::<CoordinationStrategy>("COORDINATION_STRATEGY")? {
            config.workflow.coordination_strategy = strategy;
        }
        if let Some(parallel) = vars.bool("PARALLEL_EXECUTION")? {
            config.workflow.parallel_execution = parallel;
        }
        if let Some(max) = vars.usize("MAX_PARALLEL_AGENTS")? {
            config.workflow.max_parallel_agents = max;
        }
        if let Some(retry) = vars.bool("RETRY_FAILED_STEPS")? {
            config.workflow.retry_failed_steps = retry;
        }
        if let Some(max) = vars.parse::<u32>("MAX_RETRIES")? {
            config.workflow.max_retries = max;
        }
        if let Some(ms) = vars.u64("RETRY_DELAY_MS")? {
            config.workflow.retry_delay = Duration::from_millis(ms);
        }

        // Cache
        if let Some(url) = vars.string("REDIS_URL") {
            config.cache.redis_url = Some(url);
        }
        if let Some(size) = vars.usize("REDIS_POOL_SIZE")? {
            config.cache.pool_size = size;
        }
        if let Some(prefix) = vars.string("CACHE_PREFIX") {
            config.cache.prefix = prefix;
        }

        // Telemetry
        if let Some(level) = vars.string("LOG_LEVEL") {
            config.telemetry.log_level = level.to_ascii_lowercase();
        }
        if let Some(format) = vars.parse::<LogFormat>("LOG_FORMAT")? {
            config.telemetry.log_format = format;
        }

        Ok(Self { config })
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.config.registry = registry;
        self
    }

    pub fn router(mut self, router: RouterConfig) -> Self {
        self.config.router = router;
        self
    }

    pub fn workflow(mut self, workflow: WorkflowConfig) -> Self {
        self.config.workflow = workflow;
        self
    }

    pub fn cache(mut self, cache: CacheSettings) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    /// Validate configuration and build [`OrchestratorConfig`]
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.config;

        for (name, value) in [
            ("registry.health_check_interval", c.registry.health_check_interval),
            ("registry.health_check_timeout", c.registry.health_check_timeout),
            ("registry.discovery_interval", c.registry.discovery_interval),
            ("workflow.workflow_timeout", c.workflow.workflow_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if c.router.message_max_size == 0 {
            return Err(ConfigError::ValidationError(
                "router.message_max_size must be greater than 0".to_string(),
            ));
        }
        if c.workflow.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.max_steps must be greater than 0".to_string(),
            ));
        }
        if c.workflow.max_parallel_agents == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.max_parallel_agents must be greater than 0".to_string(),
            ));
        }
        if c.cache.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "cache.pool_size must be greater than 0".to_string(),
            ));
        }
        if c.cache.prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "cache.prefix cannot be empty".to_string(),
            ));
        }
        if c.cache.redis_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "cache.redis_url cannot be empty when set".to_string(),
            ));
        }
        if !matches!(
            c.telemetry.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "telemetry.log_level '{}' is not one of trace, debug, info, warn, error, off",
                c.telemetry.log_level
            )));
        }

        Ok(())
    }
}

// Environment variable helpers

struct EnvVars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvVars<'_> {
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}{name}")
    }

    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let key = Self::key(name);
        match (self.lookup)(&key) {
            Some(val) => match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidEnvVar {
                    key,
                    message: format!(
                        "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                    ),
                }),
            },
            None => Ok(None),
        }
    }

    fn u64(&self, name: &str) -> Result<Option<u64>, ConfigError> {
        self.parse(name)
    }

    fn usize(&self, name: &str) -> Result<Option<usize>, ConfigError> {
        self.parse(name)
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let key = Self::key(name);
        match (self.lookup)(&key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    message: format!("invalid value '{val}': {e}"),
                    key,
                }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("TESSERA_{k}"), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_builder() {
        let config = OrchestratorConfigBuilder::new().build().unwrap();
        assert_eq!(config.registry.health_check_interval, Duration::from_secs(60));
        assert_eq!(config.router.message_max_size, 1024 * 1024);
        assert_eq!(config.workflow.max_parallel_agents, 5);
        assert_eq!(config.cache.prefix, "acp:");
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
    }

    #[test]
    fn test_from_source_overrides() {
        let config = OrchestratorConfigBuilder::from_source(source(&[
            ("HEALTH_CHECK_TIMEOUT_SECS", "5"),
            ("DISCOVERY_ENABLED", "off"),
            ("MESSAGE_TIMEOUT_SECS", "0"),
            ("COORDINATION_STRATEGY", "parallel"),
            ("MAX_RETRIES", "1"),
            ("RETRY_DELAY_MS", "250"),
            ("REDIS_URL", "redis://cache:6379"),
            ("CACHE_PREFIX", "tenant-a:"),
            ("LOG_LEVEL", "DEBUG"),
            ("LOG_FORMAT", "pretty"),
        ]))
        .unwrap()
        .build()
        .unwrap();

        assert_eq!(config.registry.stale_after(), Duration::from_secs(10));
        assert!(!config.registry.discovery_enabled);
        assert_eq!(config.router.executor_timeout, None);
        assert_eq!(config.workflow.coordination_strategy, CoordinationStrategy::Parallel);
        assert_eq!(config.workflow.max_retries, 1);
        assert_eq!(config.workflow.retry_delay, Duration::from_millis(250));
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.cache.prefix, "tenant-a:");
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
    }

    #[rstest]
    #[case("DISCOVERY_ENABLED", "maybe")]
    #[case("MESSAGE_MAX_SIZE", "-1")]
    #[case("COORDINATION_STRATEGY", "random")]
    #[case("LOG_FORMAT", "xml")]
    fn test_malformed_values(#[case] key: &str, #[case] value: &str) {
        let err = OrchestratorConfigBuilder::from_source(source(&[(key, value)])).unwrap_err();
        match err {
            ConfigError::InvalidEnvVar { key: reported, .. } => {
                assert_eq!(reported, format!("TESSERA_{key}"));
            }
            other => panic!("expected InvalidEnvVar, got {other}"),
        }
    }

    #[rstest]
    #[case("HEALTH_CHECK_INTERVAL_SECS", "0", "registry.health_check_interval must be greater than 0")]
    #[case("MESSAGE_MAX_SIZE", "0", "router.message_max_size must be greater than 0")]
    #[case("MAX_PARALLEL_AGENTS", "0", "workflow.max_parallel_agents must be greater than 0")]
    #[case("CACHE_PREFIX", "", "cache.prefix cannot be empty")]
    #[case("LOG_LEVEL", "verbose", "telemetry.log_level 'verbose'")]
    fn test_out_of_range_values(#[case] key: &str, #[case] value: &str, #[case] message: &str) {
        let result = OrchestratorConfigBuilder::from_source(source(&[(key, value)]))
            .unwrap()
            .build();
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains(message), "{err}");
    }

    #[test]
    fn test_summary_reports_backend() {
        let config = OrchestratorConfig::default();
        let summary = config.summary();
        assert_eq!(summary["cache"]["backend"], "memory");
        assert_eq!(summary["workflow"]["coordination_strategy"], "sequential");
        assert_eq!(summary["router"]["message_timeout_secs"], 30);
    }
}
