//! Typed views over payloads and cached snapshots.
//!
//! Messages, responses and cache entries are free-form JSON at the boundary;
//! these structs are what internal consumers actually read and write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentDescriptor;
use crate::message::Payload;
use crate::types::{AgentStatus, StepStatus, WorkflowStatus};
use crate::workflow::{Workflow, WorkflowStep};

/// Content of every message the workflow engine sends for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub step_name: String,
    pub step_data: Payload,
    pub workflow_id: String,
    pub step_id: String,
}

impl StepRequest {
    pub fn for_step(workflow_id: &str, step: &WorkflowStep) -> Self {
        Self {
            step_name: step.step_name.clone(),
            step_data: step.input_data.clone(),
            workflow_id: workflow_id.to_string(),
            step_id: step.step_id.clone(),
        }
    }

    /// Decode from a message payload.
    pub fn from_payload(payload: &Payload) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(payload.clone()))
    }

    pub fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("step_name".into(), self.step_name.into());
        payload.insert("step_data".into(), serde_json::Value::Object(self.step_data));
        payload.insert("workflow_id".into(), self.workflow_id.into());
        payload.insert("step_id".into(), self.step_id.into());
        payload
    }
}

/// Cached liveness record for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusRecord {
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
    pub current_runs: u32,
    pub max_runs: u32,
}

impl AgentStatusRecord {
    pub fn from_descriptor(descriptor: &AgentDescriptor, last_seen: DateTime<Utc>) -> Self {
        Self {
            status: descriptor.status,
            last_seen,
            current_runs: descriptor.current_runs,
            max_runs: descriptor.max_concurrent_runs,
        }
    }
}

/// Cached static metadata for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadataRecord {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_version: String,
    pub capabilities: Vec<String>,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
    pub is_stateful: bool,
    pub max_concurrent_runs: u32,
}

impl From<&AgentDescriptor> for AgentMetadataRecord {
    fn from(d: &AgentDescriptor) -> Self {
        Self {
            agent_id: d.agent_id.clone(),
            agent_name: d.agent_name.clone(),
            agent_version: d.agent_version.clone(),
            capabilities: d.capabilities.clone(),
            input_types: d.input_types.clone(),
            output_types: d.output_types.clone(),
            is_stateful: d.is_stateful,
            max_concurrent_runs: d.max_concurrent_runs,
        }
    }
}

/// Cross-process progress snapshot of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub completed_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowSnapshot {
    /// Snapshot written when a workflow is accepted.
    pub fn started(workflow: &Workflow) -> Self {
        Self {
            status: WorkflowStatus::Running,
            current_step: workflow.steps.first().map(|s| s.step_id.clone()),
            progress: 0,
            started_at: workflow.started_at,
            completed_at: None,
            total_steps: workflow.steps.len(),
            completed_steps: 0,
            duration_ms: None,
            error: None,
        }
    }

    /// Snapshot of the workflow's state right now.
    pub fn of(workflow: &Workflow) -> Self {
        let terminal = workflow.status.is_terminal();
        let progress = match workflow.status {
            WorkflowStatus::Completed => 100,
            WorkflowStatus::Failed => 0,
            _ => workflow.progress(),
        };
        Self {
            status: workflow.status,
            current_step: if terminal {
                None
            } else {
                workflow.current_step().map(str::to_string)
            },
            progress,
            started_at: workflow.started_at,
            completed_at: workflow.completed_at,
            total_steps: workflow.steps.len(),
            completed_steps: workflow.completed_steps(),
            duration_ms: terminal.then(|| workflow.duration_ms()),
            error: workflow.error.clone(),
        }
    }
}

/// Cached outcome of one step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
    pub agent_id: String,
    pub completed_at: DateTime<Utc>,
}

impl StepSnapshot {
    pub fn of(step: &WorkflowStep) -> Self {
        Self {
            status: step.status,
            result: step.output_data.clone(),
            error: step.error.clone(),
            duration_ms: step.duration_ms(),
            agent_id: step.agent_id.clone(),
            completed_at: step.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_request_payload_roundtrip() {
        let step = WorkflowStep::new("s1", "Gather", "biz-1").with_input("topic", "billing");
        let request = StepRequest::for_step("wf-1", &step);
        let payload = request.clone().into_payload();

        assert_eq!(payload["step_id"], json!("s1"));
        assert_eq!(payload["step_data"]["topic"], json!("billing"));
        assert_eq!(StepRequest::from_payload(&payload).unwrap(), request);
    }

    #[test]
    fn test_terminal_snapshot() {
        let mut wf = Workflow::new("wf", "W").with_step(WorkflowStep::new("a", "A", "x"));
        wf.started_at = Some(Utc::now());
        let started = WorkflowSnapshot::started(&wf);
        assert_eq!(started.current_step.as_deref(), Some("a"));
        assert_eq!(started.progress, 0);

        wf.status = WorkflowStatus::Failed;
        wf.error = Some("boom".into());
        wf.completed_at = Some(Utc::now());
        let failed = WorkflowSnapshot::of(&wf);
        assert_eq!(failed.progress, 0);
        assert!(failed.current_step.is_none());
        assert!(failed.duration_ms.is_some());
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
