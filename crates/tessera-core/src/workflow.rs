//! Workflow and step definitions.
//!
//! Both types double as the YAML/JSON definition format: only ids, names,
//! agent bindings, inputs and dependencies are required; runtime fields
//! default to their initial values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Payload;
use crate::types::{StepStatus, WorkflowStatus};

/// Rejected step status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step_id}' cannot move from {from} to {to}")]
pub struct TransitionError {
    pub step_id: String,
    pub from: StepStatus,
    pub to: StepStatus,
}

/// One unit of work bound to a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub step_name: String,
    pub agent_id: String,
    #[serde(default)]
    pub input_data: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Payload>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowStep {
    pub fn new(
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            agent_id: agent_id.into(),
            input_data: Payload::new(),
            output_data: None,
            status: StepStatus::Pending,
            depends_on: Vec::new(),
            retry_count: 0,
            max_retries: default_max_retries(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.input_data.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn transition(&mut self, to: StepStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                step_id: self.step_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `pending → running`; stamps the start time.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error = None;
        Ok(())
    }

    /// `running → completed`; stores the output.
    pub fn complete(&mut self, output: Payload) -> Result<(), TransitionError> {
        self.transition(StepStatus::Completed)?;
        self.output_data = Some(output);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `running → failed`; records the error.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `failed → pending` for a bounded retry; bumps the retry counter.
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        self.transition(StepStatus::Pending)?;
        self.retry_count += 1;
        Ok(())
    }

    /// Return to a pristine pending state. Only used when a whole workflow is
    /// explicitly retried.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.output_data = None;
        self.retry_count = 0;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
    }

    /// Wall-clock duration of the last attempt.
    pub fn duration_ms(&self) -> f64 {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => millis_between(start, end),
            _ => 0.0,
        }
    }
}

/// A named, versioned DAG of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub workflow_name: String,
    #[serde(default = "default_version")]
    pub workflow_version: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Payload,
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            workflow_version: default_version(),
            steps: Vec::new(),
            status: WorkflowStatus::Pending,
            created_by: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            error: None,
            metadata: Payload::new(),
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.workflow_version = version.into();
        self
    }

    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = Some(who.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// First step currently running, if any.
    pub fn current_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Running)
            .map(|s| s.step_id.as_str())
    }

    /// Percentage of completed steps, 0..=100.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        ((self.completed_steps() * 100) / self.steps.len()) as u8
    }

    pub fn duration_ms(&self) -> f64 {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => millis_between(start, end),
            _ => 0.0,
        }
    }

    /// Clear run state so the workflow can be started again.
    pub fn reset(&mut self) {
        self.status = WorkflowStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        for step in &mut self.steps {
            step.reset();
        }
    }
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    end.signed_duration_since(start)
        .num_microseconds()
        .map(|us| us as f64 / 1000.0)
        .unwrap_or(0.0)
}
