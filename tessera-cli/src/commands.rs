//! Subcommand implementations.

use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tessera::agent::{AgentExecutor, FnExecutor};
use tessera::model::{AgentDescriptor, Message, Response, Workflow};
use tessera::workflow::ExecutionPlan;
use tessera::{OrchestrationContext, OrchestratorConfig};
use tracing::info;

use crate::loader::CliError;

/// Check a definition and describe its execution plan.
pub fn validate(workflow: &Workflow, max_steps: usize) -> Result<Value, CliError> {
    let plan = ExecutionPlan::build(workflow, max_steps)?;
    Ok(json!({
        "workflow_id": plan.workflow_id,
        "steps": plan.step_count(),
        "order": plan.order,
        "levels": plan.levels,
        "depth": plan.depth(),
        "width": plan.width(),
    }))
}

/// Answers every step with its own request payload.
fn echo_executor(agent_id: String) -> Arc<dyn AgentExecutor> {
    Arc::new(FnExecutor::new(move |message: Message| {
        let agent_id = agent_id.clone();
        async move {
            let mut content = message.content.clone();
            content.insert("handled_by".to_string(), json!(agent_id));
            Ok(Response::success(&message.message_id, content))
        }
    }))
}

/// Dry-run a workflow against echo agents and report the final state.
pub async fn run(workflow: Workflow, config: OrchestratorConfig) -> Result<Value, CliError> {
    let workflow_id = workflow.workflow_id.clone();
    let wait = config.workflow.workflow_timeout + Duration::from_secs(1);
    let slots = u32::try_from(config.workflow.max_parallel_agents).unwrap_or(u32::MAX);

    let context = OrchestrationContext::connect(config).await?;

    let agent_ids: BTreeSet<&str> = workflow.steps.iter().map(|s| s.agent_id.as_str()).collect();
    for agent_id in agent_ids {
        context
            .registry()
            .register(
                AgentDescriptor::new(agent_id, agent_id).with_max_concurrent_runs(slots),
                echo_executor(agent_id.to_string()),
            )
            .await
            .map_err(tessera::TesseraError::from)?;
    }
    context.start().await;

    let started = context.engine().start_workflow(workflow).await;
    if !started.success {
        context.shutdown().await;
        return Err(CliError::Rejected {
            code: started.error_code.unwrap_or_default(),
            error: started.error.unwrap_or_default(),
        });
    }
    info!(workflow_id = %workflow_id, "Workflow started");

    let outcome = context.engine().wait_for_terminal(&workflow_id, wait).await;
    let report = match context.engine().get_workflow(&workflow_id).await {
        Some(finished) => json!({
            "workflow_id": finished.workflow_id,
            "status": finished.status,
            "progress": finished.progress(),
            "error": finished.error,
            "steps": finished
                .steps
                .iter()
                .map(|s| json!({
                    "step_id": s.step_id,
                    "status": s.status,
                    "retry_count": s.retry_count,
                    "duration_ms": s.duration_ms(),
                    "output": s.output_data,
                }))
                .collect::<Vec<_>>(),
        }),
        None => Value::Null,
    };

    context.shutdown().await;
    outcome?;
    Ok(report)
}
