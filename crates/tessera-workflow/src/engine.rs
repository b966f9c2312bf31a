//! Workflow Engine
//!
//! Accepts workflow definitions, validates them into an [`ExecutionPlan`],
//! and runs each accepted workflow on its own background task. Steps are
//! dispatched through the [`MessageRouter`] as `request` messages addressed
//! to the step's agent.
//!
//! # Lifecycle
//!
//! A workflow lives in exactly one of three maps. It enters `active` when
//! accepted, and leaves it once: for `completed` (success or cancellation)
//! or for `failed`. Every transition persists a [`WorkflowSnapshot`] to the
//! [`StateCache`] and emits a lifecycle event.
//!
//! # Cancellation
//!
//! Cancelling aborts the execution task. Steps already handed to an agent
//! are not rolled back; their executors run to completion on the router's
//! dispatch task and their results are discarded.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_agent::MessageRouter;
use tessera_cache::StateCache;
use tessera_core::{
    ErrorCode, EventBus, EventType, LifecycleEvent, Message, MessageType, Payload, Response,
    StepRequest, StepSnapshot, StepStatus, Workflow, WorkflowSnapshot, WorkflowStatus,
    WorkflowStep,
};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{CoordinationStrategy, WorkflowConfig};
use crate::error::{WorkflowError, WorkflowResult};
use crate::plan::{ExecutionPlan, validate_definition};

// ============================================================================
// Core Types
// ============================================================================

/// Caller-facing projection of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl WorkflowStatusView {
    pub fn of(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.workflow_id.clone(),
            workflow_name: workflow.workflow_name.clone(),
            status: workflow.status,
            current_step: workflow.current_step().map(str::to_string),
            completed_steps: workflow.completed_steps(),
            total_steps: workflow.steps.len(),
            progress: workflow.progress(),
            started_at: workflow.started_at,
            completed_at: workflow.completed_at,
            retry_count: workflow.retry_count,
            error: workflow.error.clone(),
        }
    }
}

/// Engine-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub active_workflows: usize,
    pub completed_workflows: usize,
    pub cancelled_workflows: usize,
    pub failed_workflows: usize,
    /// Step attempts that reached a terminal status
    pub total_steps_executed: u64,
    /// Mean duration of workflows that completed or failed
    pub avg_workflow_duration_ms: f64,
}

#[derive(Default)]
struct EngineState {
    active: HashMap<String, Workflow>,
    completed: HashMap<String, Workflow>,
    failed: HashMap<String, Workflow>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl EngineState {
    fn find(&self, workflow_id: &str) -> Option<&Workflow> {
        self.active
            .get(workflow_id)
            .or_else(|| self.completed.get(workflow_id))
            .or_else(|| self.failed.get(workflow_id))
    }
}

#[derive(Default)]
struct Counters {
    steps_executed: u64,
    finished: u64,
    total_duration_ms: f64,
}

// ============================================================================
// Workflow Engine
// ============================================================================

/// Runs dependency-ordered workflows against registered agents.
pub struct WorkflowEngine {
    router: Arc<MessageRouter>,
    config: WorkflowConfig,
    cache: StateCache,
    events: EventBus,
    state: RwLock<EngineState>,
    counters: RwLock<Counters>,
    settled: Notify,
}

impl WorkflowEngine {
    /// Create an engine backed by an in-memory state cache.
    pub fn new(router: Arc<MessageRouter>, config: WorkflowConfig) -> Self {
        Self {
            router,
            config,
            cache: StateCache::in_memory(),
            events: EventBus::default(),
            state: RwLock::new(EngineState::default()),
            counters: RwLock::new(Counters::default()),
            settled: Notify::new(),
        }
    }

    pub fn with_cache(mut self, cache: StateCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------------

    /// Validate and launch `workflow`. Returns as soon as execution has been
    /// handed to a background task.
    pub async fn start_workflow(self: &Arc<Self>, workflow: Workflow) -> Response {
        let response_id = response_id(&workflow.workflow_id);

        match self.launch(workflow).await {
            Ok(started) => started_response(&response_id, &started),
            Err(e) => {
                warn!(response_id = %response_id, error = %e, "Workflow rejected");
                Response::failure(
                    &response_id,
                    e.response_code().unwrap_or(ErrorCode::WorkflowStartError),
                    e.to_string(),
                )
            }
        }
    }

    /// Stop a running workflow. Steps already dispatched are not rolled back.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Response {
        let response_id = response_id(workflow_id);
        let not_running = || {
            Response::failure(
                &response_id,
                ErrorCode::WorkflowNotFound,
                format!("Workflow {workflow_id} is not running"),
            )
        };

        let snapshot = {
            let mut state = self.state.write().await;
            let running = state
                .active
                .get(workflow_id)
                .is_some_and(|wf| wf.status == WorkflowStatus::Running);
            if !running {
                return not_running();
            }
            let Some(mut workflow) = state.active.remove(workflow_id) else {
                return not_running();
            };
            if let Some(task) = state.tasks.remove(workflow_id) {
                task.abort();
            }

            abandon_running_steps(&mut workflow, "workflow cancelled");
            workflow.status = WorkflowStatus::Cancelled;
            workflow.completed_at = Some(Utc::now());
            let snapshot = WorkflowSnapshot::of(&workflow);
            state.completed.insert(workflow_id.to_string(), workflow);
            snapshot
        };

        self.persist_workflow(workflow_id, &snapshot).await;
        self.events.emit(LifecycleEvent::workflow(
            EventType::WorkflowCancelled,
            workflow_id,
            json!({
                "completed_steps": snapshot.completed_steps,
                "total_steps": snapshot.total_steps,
            }),
        ));
        self.settled.notify_waiters();
        info!(workflow_id = %workflow_id, "Workflow cancelled");

        Response::success(&response_id, Payload::new())
            .with_field("workflow_id", workflow_id)
            .with_field("status", WorkflowStatus::Cancelled.as_str())
    }

    /// Re-run a failed workflow from scratch, within its own retry cap.
    pub async fn retry_workflow(self: &Arc<Self>, workflow_id: &str) -> Response {
        let response_id = response_id(workflow_id);

        let previous = {
            let mut state = self.state.write().await;
            let Some((retry_count, max_retries)) = state
                .failed
                .get(workflow_id)
                .map(|wf| (wf.retry_count, wf.max_retries))
            else {
                return Response::failure(
                    &response_id,
                    ErrorCode::WorkflowNotFound,
                    format!("Workflow {workflow_id} is not among failed workflows"),
                );
            };
            if retry_count >= max_retries {
                return Response::failure(
                    &response_id,
                    ErrorCode::MaxRetriesExceeded,
                    WorkflowError::MaxRetriesExceeded {
                        workflow_id: workflow_id.to_string(),
                        max: max_retries,
                    }
                    .to_string(),
                );
            }
            match state.failed.remove(workflow_id) {
                Some(workflow) => workflow,
                None => {
                    return Response::failure(
                        &response_id,
                        ErrorCode::WorkflowNotFound,
                        format!("Workflow {workflow_id} is not among failed workflows"),
                    );
                }
            }
        };

        let mut workflow = previous.clone();
        workflow.reset();
        workflow.retry_count += 1;
        info!(
            workflow_id = %workflow_id,
            attempt = workflow.retry_count,
            max_retries = workflow.max_retries,
            "Retrying workflow"
        );

        match self.launch(workflow).await {
            Ok(started) => started_response(&response_id, &started)
                .with_field("retry_count", started.retry_count),
            Err(e) => {
                error!(workflow_id = %workflow_id, error = %e, "Workflow retry could not start");
                self.state
                    .write()
                    .await
                    .failed
                    .entry(workflow_id.to_string())
                    .or_insert(previous);
                Response::failure(&response_id, ErrorCode::WorkflowRetryError, e.to_string())
            }
        }
    }

    /// Cancel every running workflow. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.state.read().await.active.keys().cloned().collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel_workflow(&id).await.success {
                cancelled += 1;
            }
        }
        cancelled
    }

    // ------------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------------

    /// Store a validated definition for later instantiation.
    pub async fn save_template(&self, template_id: &str, workflow: &Workflow) -> WorkflowResult<()> {
        if template_id.trim().is_empty() {
            return Err(WorkflowError::Invalid("template_id is required".to_string()));
        }
        validate_definition(workflow, self.config.max_steps)?;
        self.cache
            .cache_workflow_template(template_id, workflow)
            .await?;
        debug!(template_id = %template_id, steps = workflow.steps.len(), "Template saved");
        Ok(())
    }

    /// Start a fresh copy of a stored template under `workflow_id`.
    pub async fn start_from_template(
        self: &Arc<Self>,
        template_id: &str,
        workflow_id: &str,
    ) -> Response {
        let template = match self.cache.get_workflow_template(template_id).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                return Response::failure(
                    response_id(workflow_id),
                    ErrorCode::WorkflowNotFound,
                    format!("Template {template_id} not found"),
                );
            }
            Err(e) => {
                return Response::failure(
                    response_id(workflow_id),
                    ErrorCode::WorkflowStartError,
                    e.to_string(),
                );
            }
        };

        let mut workflow = template;
        workflow.reset();
        workflow.workflow_id = workflow_id.to_string();
        workflow.retry_count = 0;
        workflow.created_at = Utc::now();
        workflow
            .metadata
            .insert("template_id".to_string(), json!(template_id));

        self.start_workflow(workflow).await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn get_workflow_status(&self, workflow_id: &str) -> Option<WorkflowStatusView> {
        self.state
            .read()
            .await
            .find(workflow_id)
            .map(WorkflowStatusView::of)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.state.read().await.find(workflow_id).cloned()
    }

    /// Every known workflow, ordered by id.
    pub async fn list_workflows(&self) -> Vec<WorkflowStatusView> {
        let state = self.state.read().await;
        let mut views: Vec<WorkflowStatusView> = state
            .active
            .values()
            .chain(state.completed.values())
            .chain(state.failed.values())
            .map(WorkflowStatusView::of)
            .collect();
        views.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        views
    }

    pub async fn active_workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_stats(&self) -> EngineStats {
        let state = self.state.read().await;
        let counters = self.counters.read().await;
        let cancelled = state
            .completed
            .values()
            .filter(|wf| wf.status == WorkflowStatus::Cancelled)
            .count();

        EngineStats {
            active_workflows: state.active.len(),
            completed_workflows: state.completed.len() - cancelled,
            cancelled_workflows: cancelled,
            failed_workflows: state.failed.len(),
            total_steps_executed: counters.steps_executed,
            avg_workflow_duration_ms: if counters.finished == 0 {
                0.0
            } else {
                counters.total_duration_ms / counters.finished as f64
            },
        }
    }

    /// Cached snapshot, readable from any process sharing the cache.
    pub async fn get_workflow_state(&self, workflow_id: &str) -> WorkflowResult<Option<WorkflowSnapshot>> {
        Ok(self.cache.get_workflow_state(workflow_id).await?)
    }

    /// Cached outcome of a step's latest attempt.
    pub async fn get_workflow_step_result(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> WorkflowResult<Option<StepSnapshot>> {
        Ok(self.cache.get_workflow_step(workflow_id, step_id).await?)
    }

    /// Patch the cached progress of a workflow. Returns false when there is
    /// no cached snapshot.
    pub async fn update_workflow_progress(
        &self,
        workflow_id: &str,
        progress: u8,
        current_step: Option<&str>,
    ) -> WorkflowResult<bool> {
        Ok(self
            .cache
            .update_workflow_progress(workflow_id, progress, current_step, None)
            .await?)
    }

    /// Wait until `workflow_id` leaves the active set.
    pub async fn wait_for_terminal(
        &self,
        workflow_id: &str,
        timeout: Duration,
    ) -> WorkflowResult<WorkflowStatusView> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.read().await;
                if !state.active.contains_key(workflow_id) {
                    return state
                        .find(workflow_id)
                        .map(WorkflowStatusView::of)
                        .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(WorkflowError::Timeout(timeout));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    async fn launch(self: &Arc<Self>, mut workflow: Workflow) -> WorkflowResult<Workflow> {
        let plan = ExecutionPlan::build(&workflow, self.config.max_steps)?;
        let workflow_id = workflow.workflow_id.clone();

        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());
        workflow.completed_at = None;
        workflow.error = None;
        let snapshot = WorkflowSnapshot::started(&workflow);
        let started = workflow.clone();

        // Records of an earlier run under this id are superseded here, in the
        // same critical section that makes the new run active
        let (superseded_completed, superseded_failed) = {
            let mut state = self.state.write().await;
            if state.active.contains_key(&workflow_id) {
                return Err(WorkflowError::AlreadyRunning(workflow_id));
            }
            let superseded = (
                state.completed.remove(&workflow_id),
                state.failed.remove(&workflow_id),
            );
            state.active.insert(workflow_id.clone(), workflow);
            superseded
        };

        if let Err(e) = self.cache.cache_workflow_state(&workflow_id, &snapshot).await {
            let mut state = self.state.write().await;
            state.active.remove(&workflow_id);
            if let Some(previous) = superseded_completed {
                state.completed.insert(workflow_id.clone(), previous);
            }
            if let Some(previous) = superseded_failed {
                state.failed.insert(workflow_id.clone(), previous);
            }
            error!(workflow_id = %workflow_id, error = %e, "Could not persist initial workflow state");
            return Err(e.into());
        }

        self.events.emit(LifecycleEvent::workflow(
            EventType::WorkflowStarted,
            &workflow_id,
            json!({
                "workflow_name": started.workflow_name,
                "total_steps": started.steps.len(),
                "strategy": self.config.coordination_strategy.as_str(),
                "retry_count": started.retry_count,
            }),
        ));

        {
            let mut state = self.state.write().await;
            if state.active.contains_key(&workflow_id) {
                let engine = Arc::clone(self);
                let id = workflow_id.clone();
                let task = tokio::spawn(async move { engine.run(id, plan).await });
                state.tasks.insert(workflow_id.clone(), task);
            }
        }

        info!(
            workflow_id = %workflow_id,
            total_steps = started.steps.len(),
            strategy = %self.config.coordination_strategy,
            "Workflow started"
        );
        Ok(started)
    }

    async fn run(self: Arc<Self>, workflow_id: String, plan: ExecutionPlan) {
        let limit = self.config.workflow_timeout;
        let outcome = tokio::time::timeout(limit, self.execute(&workflow_id, &plan))
            .await
            .unwrap_or(Err(WorkflowError::Timeout(limit)));
        self.finalize(&workflow_id, outcome).await;
    }

    async fn execute(&self, workflow_id: &str, plan: &ExecutionPlan) -> WorkflowResult<()> {
        match self.config.coordination_strategy {
            CoordinationStrategy::Sequential => {
                for step_id in &plan.order {
                    self.execute_step(workflow_id, step_id).await?;
                }
            }
            CoordinationStrategy::Parallel => {
                for (depth, level) in plan.levels.iter().enumerate() {
                    debug!(workflow_id = %workflow_id, depth, steps = level.len(), "Executing level");
                    self.execute_level(workflow_id, level).await?;
                }
            }
        }
        Ok(())
    }

    /// Run one dependency level. With parallel execution every step of the
    /// level settles before the first failure is reported.
    async fn execute_level(&self, workflow_id: &str, level: &[String]) -> WorkflowResult<()> {
        if !self.config.parallel_execution || level.len() == 1 {
            for step_id in level {
                self.execute_step(workflow_id, step_id).await?;
            }
            return Ok(());
        }

        let steps: Vec<_> = level
            .iter()
            .map(|step_id| self.execute_step(workflow_id, step_id))
            .collect();
        let results: Vec<WorkflowResult<()>> = stream::iter(steps)
            .buffer_unordered(self.config.max_parallel_agents.max(1))
            .collect()
            .await;
        results.into_iter().collect()
    }

    async fn execute_step(&self, workflow_id: &str, step_id: &str) -> WorkflowResult<()> {
        loop {
            let (request, agent_id) = self
                .with_active(workflow_id, |wf| {
                    let step = step_of(wf, step_id)?;
                    step.start()?;
                    Ok((
                        StepRequest::for_step(workflow_id, step),
                        step.agent_id.clone(),
                    ))
                })
                .await?;

            debug!(workflow_id = %workflow_id, step_id = %step_id, agent_id = %agent_id, "Dispatching step");
            let message = Message::new(MessageType::Request)
                .with_id(format!("step_{step_id}_{workflow_id}"))
                .to_agent(agent_id.clone())
                .with_content(request.into_payload());
            let response = self.router.route_workflow_message(message, workflow_id).await;

            if response.success {
                self.step_succeeded(workflow_id, step_id, &agent_id, response.content)
                    .await?;
                return Ok(());
            }

            let error = response
                .error
                .clone()
                .unwrap_or_else(|| "step failed".to_string());
            let (snapshot, attempt, will_retry) = self
                .with_active(workflow_id, |wf| {
                    let step = step_of(wf, step_id)?;
                    step.fail(error.clone())?;
                    let snapshot = StepSnapshot::of(step);
                    let attempt = step.retry_count;
                    let will_retry = attempt < self.config.retry_bound(step.max_retries);
                    if will_retry {
                        step.requeue()?;
                    }
                    Ok((snapshot, attempt, will_retry))
                })
                .await?;

            self.counters.write().await.steps_executed += 1;
            self.persist_step(workflow_id, step_id, &snapshot).await;
            self.events.emit(LifecycleEvent::workflow(
                EventType::WorkflowStepFailed,
                workflow_id,
                json!({
                    "step_id": step_id,
                    "agent_id": agent_id,
                    "error": error,
                    "error_code": response.error_code,
                    "retry_count": attempt,
                    "will_retry": will_retry,
                }),
            ));

            if !will_retry {
                error!(
                    workflow_id = %workflow_id,
                    step_id = %step_id,
                    attempts = attempt + 1,
                    error = %error,
                    "Step failed"
                );
                return Err(WorkflowError::StepFailed {
                    step_id: step_id.to_string(),
                    error,
                });
            }

            warn!(
                workflow_id = %workflow_id,
                step_id = %step_id,
                attempt = attempt + 1,
                error = %error,
                "Step failed, retrying"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    async fn step_succeeded(
        &self,
        workflow_id: &str,
        step_id: &str,
        agent_id: &str,
        output: Payload,
    ) -> WorkflowResult<()> {
        let (snapshot, progress, completed, total, current) = self
            .with_active(workflow_id, |wf| {
                let step = step_of(wf, step_id)?;
                step.complete(output)?;
                let snapshot = StepSnapshot::of(step);
                Ok((
                    snapshot,
                    wf.progress(),
                    wf.completed_steps(),
                    wf.steps.len(),
                    wf.current_step().map(str::to_string),
                ))
            })
            .await?;

        self.counters.write().await.steps_executed += 1;
        self.persist_step(workflow_id, step_id, &snapshot).await;
        self.events.emit(LifecycleEvent::workflow(
            EventType::WorkflowStepCompleted,
            workflow_id,
            json!({
                "step_id": step_id,
                "agent_id": agent_id,
                "duration_ms": snapshot.duration_ms,
            }),
        ));

        if let Err(e) = self
            .cache
            .update_workflow_progress(workflow_id, progress, current.as_deref(), Some(completed))
            .await
        {
            warn!(workflow_id = %workflow_id, error = %e, "Failed to update cached progress");
        }
        self.events.emit(LifecycleEvent::workflow(
            EventType::WorkflowProgress,
            workflow_id,
            json!({
                "progress": progress,
                "completed_steps": completed,
                "total_steps": total,
                "current_step": current,
            }),
        ));

        info!(
            workflow_id = %workflow_id,
            step_id = %step_id,
            agent_id = %agent_id,
            progress,
            "Step completed"
        );
        Ok(())
    }

    /// Record the terminal outcome of a run that was not cancelled.
    async fn finalize(&self, workflow_id: &str, outcome: WorkflowResult<()>) {
        let snapshot = {
            let mut state = self.state.write().await;
            let Some(workflow) = state
                .active
                .get_mut(workflow_id)
                .filter(|wf| wf.status == WorkflowStatus::Running)
            else {
                state.tasks.remove(workflow_id);
                debug!(workflow_id = %workflow_id, "Run settled after the workflow left the active set");
                return;
            };

            workflow.completed_at = Some(Utc::now());
            match &outcome {
                Ok(()) => {
                    workflow.status = WorkflowStatus::Completed;
                    workflow.error = None;
                }
                Err(e) => {
                    abandon_running_steps(workflow, &e.to_string());
                    workflow.status = WorkflowStatus::Failed;
                    workflow.error = Some(e.to_string());
                }
            }
            WorkflowSnapshot::of(workflow)
        };

        // Persist before leaving the active set so waiters observe the final snapshot
        self.persist_workflow(workflow_id, &snapshot).await;

        let finished = {
            let mut state = self.state.write().await;
            state.tasks.remove(workflow_id);
            let Some(workflow) = state.active.remove(workflow_id) else {
                return;
            };
            let finished = workflow.clone();
            match workflow.status {
                WorkflowStatus::Completed => state.completed.insert(workflow_id.to_string(), workflow),
                _ => state.failed.insert(workflow_id.to_string(), workflow),
            };
            finished
        };

        let duration_ms = finished.duration_ms();
        {
            let mut counters = self.counters.write().await;
            counters.finished += 1;
            counters.total_duration_ms += duration_ms;
        }

        let event_type = match finished.status {
            WorkflowStatus::Completed => EventType::WorkflowCompleted,
            _ => EventType::WorkflowFailed,
        };
        self.events.emit(LifecycleEvent::workflow(
            event_type,
            workflow_id,
            json!({
                "duration_ms": duration_ms,
                "completed_steps": finished.completed_steps(),
                "total_steps": finished.steps.len(),
                "error": finished.error,
            }),
        ));

        match &outcome {
            Ok(()) => info!(workflow_id = %workflow_id, duration_ms, "Workflow completed"),
            Err(e) => error!(
                workflow_id = %workflow_id,
                duration_ms,
                error_code = e.error_code(),
                error = %e,
                "Workflow failed"
            ),
        }
        self.settled.notify_waiters();
    }

    /// Apply `f` to a running workflow. Fails once the workflow has been
    /// cancelled or finalized.
    async fn with_active<T>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut Workflow) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let mut state = self.state.write().await;
        let workflow = state
            .active
            .get_mut(workflow_id)
            .filter(|wf| wf.status == WorkflowStatus::Running)
            .ok_or_else(|| WorkflowError::Cancelled(workflow_id.to_string()))?;
        f(workflow)
    }

    async fn persist_workflow(&self, workflow_id: &str, snapshot: &WorkflowSnapshot) {
        if let Err(e) = self.cache.cache_workflow_state(workflow_id, snapshot).await {
            warn!(workflow_id = %workflow_id, error = %e, "Failed to persist workflow state");
        }
    }

    async fn persist_step(&self, workflow_id: &str, step_id: &str, snapshot: &StepSnapshot) {
        if let Err(e) = self
            .cache
            .update_workflow_step(workflow_id, step_id, snapshot)
            .await
        {
            warn!(
                workflow_id = %workflow_id,
                step_id = %step_id,
                error = %e,
                "Failed to persist step state"
            );
        }
    }
}

fn response_id(workflow_id: &str) -> String {
    format!("workflow_{workflow_id}")
}

fn started_response(response_id: &str, workflow: &Workflow) -> Response {
    Response::success(response_id, Payload::new())
        .with_field("workflow_id", workflow.workflow_id.as_str())
        .with_field("status", "started")
        .with_field("total_steps", workflow.steps.len())
}

fn step_of<'a>(workflow: &'a mut Workflow, step_id: &str) -> WorkflowResult<&'a mut WorkflowStep> {
    workflow
        .step_mut(step_id)
        .ok_or_else(|| WorkflowError::Invalid(format!("unknown step '{step_id}'")))
}

/// Close out steps left running by a run that stopped early.
fn abandon_running_steps(workflow: &mut Workflow, reason: &str) {
    for step in workflow
        .steps
        .iter_mut()
        .filter(|s| s.status == StepStatus::Running)
    {
        if let Err(e) = step.fail(reason) {
            debug!(step_id = %step.step_id, error = %e, "Could not close running step");
        }
    }
}
