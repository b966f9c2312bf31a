//! Agent descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Payload;
use crate::types::AgentStatus;

/// Everything the runtime knows about one agent instance.
///
/// Owned by the registry; callers hand a descriptor to `register` and read
/// back clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent identifier
    pub agent_id: String,
    /// Human-readable name
    pub agent_name: String,
    /// Version string
    #[serde(default = "default_version")]
    pub agent_version: String,
    /// Capability tags in advertised order
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Message types the agent accepts
    #[serde(default)]
    pub input_types: Vec<String>,
    /// Message types the agent produces
    #[serde(default)]
    pub output_types: Vec<String>,
    /// Whether the agent keeps state between messages
    #[serde(default)]
    pub is_stateful: bool,
    /// Upper bound on in-flight runs
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: u32,
    /// In-flight runs right now
    #[serde(default)]
    pub current_runs: u32,
    /// Current lifecycle status
    #[serde(default)]
    pub status: AgentStatus,
    /// Last heartbeat observed by the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub metadata: Payload,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_max_concurrent_runs() -> u32 {
    10
}

impl AgentDescriptor {
    /// Create a descriptor with default version and concurrency.
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            agent_version: default_version(),
            capabilities: Vec::new(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            is_stateful: false,
            max_concurrent_runs: default_max_concurrent_runs(),
            current_runs: 0,
            status: AgentStatus::Offline,
            last_heartbeat: None,
            metadata: Payload::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.agent_version = version.into();
        self
    }

    /// Add a capability tag (duplicates are ignored).
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_capabilities<I, S>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        capabilities
            .into_iter()
            .fold(self, |desc, cap| desc.with_capability(cap))
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_types.push(input_type.into());
        self
    }

    pub fn with_output_type(mut self, output_type: impl Into<String>) -> Self {
        self.output_types.push(output_type.into());
        self
    }

    pub fn stateful(mut self, is_stateful: bool) -> Self {
        self.is_stateful = is_stateful;
        self
    }

    pub fn with_max_concurrent_runs(mut self, max: u32) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// True while the agent is below its concurrency limit.
    pub fn has_capacity(&self) -> bool {
        self.current_runs < self.max_concurrent_runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = AgentDescriptor::new("biz-1", "Business Analyst")
            .with_capability("analysis")
            .with_capability("analysis")
            .with_capabilities(["requirements_gathering", "process_analysis"])
            .with_max_concurrent_runs(2);

        assert_eq!(desc.agent_version, "1.0.0");
        assert_eq!(
            desc.capabilities,
            vec!["analysis", "requirements_gathering", "process_analysis"]
        );
        assert!(desc.has_capability("process_analysis"));
        assert!(!desc.has_capability("deployment"));
        assert_eq!(desc.status, AgentStatus::Offline);
    }

    #[test]
    fn test_capacity() {
        let mut desc = AgentDescriptor::new("a", "A").with_max_concurrent_runs(1);
        assert!(desc.has_capacity());
        desc.current_runs = 1;
        assert!(!desc.has_capacity());
    }

    #[test]
    fn test_deserialize_defaults() {
        let desc: AgentDescriptor =
            serde_json::from_str(r#"{"agent_id":"t-1","agent_name":"Tester"}"#).unwrap();
        assert_eq!(desc.max_concurrent_runs, 10);
        assert_eq!(desc.agent_version, "1.0.0");
        assert!(desc.capabilities.is_empty());
    }
}
