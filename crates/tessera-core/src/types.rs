//! Status and classification enums shared across the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a registered agent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Not reachable / not yet online
    #[default]
    Offline,
    /// Ready to accept work
    Online,
    /// Currently processing at least one message
    Busy,
    /// Last dispatch failed at the executor boundary
    Error,
    /// Administratively drained
    Maintenance,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 5] = [
        AgentStatus::Offline,
        AgentStatus::Online,
        AgentStatus::Busy,
        AgentStatus::Error,
        AgentStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Offline => "offline",
            AgentStatus::Online => "online",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message priority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Operations a message can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Protocol
    Ping,
    Pong,
    Request,
    Response,
    Error,

    // Code
    GenerateCode,
    AnalyzeCode,
    RefactorCode,

    // Testing
    GenerateTests,
    RunTests,
    AnalyzeCoverage,

    // Deployment
    DeployApplication,
    RollbackDeployment,
    ScaleApplication,

    // Business analysis
    AnalyzeRequirements,
    GatherStakeholderNeeds,
    AnalyzeBusinessProcess,
    CreateUserStories,
    CreateAcceptanceCriteria,

    TestMessage,

    // Workflow coordination
    StartWorkflow,
    WorkflowStep,
    WorkflowComplete,
    WorkflowError,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::GenerateCode => "generate_code",
            MessageType::AnalyzeCode => "analyze_code",
            MessageType::RefactorCode => "refactor_code",
            MessageType::GenerateTests => "generate_tests",
            MessageType::RunTests => "run_tests",
            MessageType::AnalyzeCoverage => "analyze_coverage",
            MessageType::DeployApplication => "deploy_application",
            MessageType::RollbackDeployment => "rollback_deployment",
            MessageType::ScaleApplication => "scale_application",
            MessageType::AnalyzeRequirements => "analyze_requirements",
            MessageType::GatherStakeholderNeeds => "gather_stakeholder_needs",
            MessageType::AnalyzeBusinessProcess => "analyze_business_process",
            MessageType::CreateUserStories => "create_user_stories",
            MessageType::CreateAcceptanceCriteria => "create_acceptance_criteria",
            MessageType::TestMessage => "test_message",
            MessageType::StartWorkflow => "start_workflow",
            MessageType::WorkflowStep => "workflow_step",
            MessageType::WorkflowComplete => "workflow_complete",
            MessageType::WorkflowError => "workflow_error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single workflow step.
///
/// Steps only move forward (`pending → running → completed|failed`); the one
/// backward edge is `failed → pending`, used by bounded retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    /// Whether `self → next` is a legal step transition.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
                | (StepStatus::Failed, StepStatus::Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall workflow status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Completed, failed and cancelled workflows never run again without an
    /// explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StepStatus::Pending, StepStatus::Running, true)]
    #[case(StepStatus::Running, StepStatus::Completed, true)]
    #[case(StepStatus::Running, StepStatus::Failed, true)]
    #[case(StepStatus::Failed, StepStatus::Pending, true)]
    #[case(StepStatus::Pending, StepStatus::Completed, false)]
    #[case(StepStatus::Completed, StepStatus::Pending, false)]
    #[case(StepStatus::Completed, StepStatus::Running, false)]
    #[case(StepStatus::Running, StepStatus::Pending, false)]
    #[case(StepStatus::Failed, StepStatus::Running, false)]
    fn step_transitions(#[case] from: StepStatus, #[case] to: StepStatus, #[case] legal: bool) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[test]
    fn test_message_type_serde_matches_display() {
        for t in [
            MessageType::GenerateCode,
            MessageType::AnalyzeRequirements,
            MessageType::WorkflowError,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{t}\""));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
    }
}
