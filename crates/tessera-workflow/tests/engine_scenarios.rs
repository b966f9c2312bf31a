//! End-to-end engine behaviour against real registry and router instances.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tessera_agent::{AgentExecutor, AgentRegistry, FnExecutor, MessageRouter, RegistryConfig, RouterConfig};
use tessera_core::{
    AgentDescriptor, ErrorCode, Message, Response, StepStatus, Workflow, WorkflowStatus,
    WorkflowStep,
};
use tessera_workflow::{CoordinationStrategy, WorkflowConfig, WorkflowEngine};
use tokio::sync::Mutex;

/// Records `(step_id, event)` pairs and tracks peak concurrency.
#[derive(Default)]
struct Trace {
    log: Mutex<Vec<(String, &'static str)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

fn tracing_agent(trace: Arc<Trace>, delay: Duration, fail_step: Option<&'static str>) -> Arc<dyn AgentExecutor> {
    Arc::new(FnExecutor::new(move |m: Message| {
        let trace = Arc::clone(&trace);
        async move {
            let step_id = m.content["step_id"].as_str().unwrap_or_default().to_string();
            let now = trace.running.fetch_add(1, Ordering::SeqCst) + 1;
            trace.peak.fetch_max(now, Ordering::SeqCst);
            trace.log.lock().await.push((step_id.clone(), "start"));

            tokio::time::sleep(delay).await;

            trace.running.fetch_sub(1, Ordering::SeqCst);
            trace.log.lock().await.push((step_id.clone(), "end"));
            if fail_step == Some(step_id.as_str()) {
                return Ok(Response::failure_with_code(&m.message_id, "STEP_BROKEN", "broken"));
            }
            Ok(Response::success(&m.message_id, m.content))
        }
    }))
}

async fn engine(executor: Arc<dyn AgentExecutor>, config: WorkflowConfig) -> Arc<WorkflowEngine> {
    let registry = Arc::new(AgentRegistry::new(RegistryConfig::default()));
    registry
        .register(
            AgentDescriptor::new("worker", "Worker").with_max_concurrent_runs(16),
            executor,
        )
        .await
        .unwrap();
    let router = Arc::new(MessageRouter::new(registry, RouterConfig::default()));
    Arc::new(WorkflowEngine::new(router, config))
}

fn config(strategy: CoordinationStrategy) -> WorkflowConfig {
    WorkflowConfig::default()
        .with_strategy(strategy)
        .with_retry_delay(Duration::from_millis(1))
        .with_max_retries(0)
}

fn position(log: &[(String, &str)], step: &str, event: &str) -> usize {
    log.iter()
        .position(|(s, e)| s == step && *e == event)
        .unwrap_or_else(|| panic!("no {event} for {step}"))
}

#[tokio::test]
async fn sequential_dependency_finishes_before_dependent_starts() {
    let trace = Arc::new(Trace::default());
    let engine = engine(
        tracing_agent(Arc::clone(&trace), Duration::from_millis(10), None),
        config(CoordinationStrategy::Sequential),
    )
    .await;

    let wf = Workflow::new("wf-seq", "Sequential")
        .with_step(WorkflowStep::new("B", "B", "worker").depends_on("A"))
        .with_step(WorkflowStep::new("A", "A", "worker"));
    assert!(engine.start_workflow(wf).await.success);

    let view = engine
        .wait_for_terminal("wf-seq", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(view.status, WorkflowStatus::Completed);

    let workflow = engine.get_workflow("wf-seq").await.unwrap();
    let a = workflow.step("A").unwrap();
    let b = workflow.step("B").unwrap();
    assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
}

#[tokio::test]
async fn concurrent_duplicate_start_keeps_one_active() {
    let trace = Arc::new(Trace::default());
    let engine = engine(
        tracing_agent(Arc::clone(&trace), Duration::from_millis(200), None),
        config(CoordinationStrategy::Sequential),
    )
    .await;
    let wf = Workflow::new("wf-dup", "Duplicate").with_step(WorkflowStep::new("a", "A", "worker"));

    let (first, second) = tokio::join!(
        engine.start_workflow(wf.clone()),
        engine.start_workflow(wf.clone())
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.success).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| r.has_error_code(ErrorCode::WorkflowAlreadyRunning))
            .count(),
        1
    );
    assert_eq!(engine.active_workflow_ids().await, vec!["wf-dup"]);
}

#[tokio::test]
async fn parallel_levels_respect_dependencies_and_bound() {
    let trace = Arc::new(Trace::default());
    let engine = engine(
        tracing_agent(Arc::clone(&trace), Duration::from_millis(30), None),
        config(CoordinationStrategy::Parallel).with_max_parallel_agents(2),
    )
    .await;

    let wf = Workflow::new("wf-par", "Fan out")
        .with_step(WorkflowStep::new("root", "Root", "worker"))
        .with_step(WorkflowStep::new("x", "X", "worker").depends_on("root"))
        .with_step(WorkflowStep::new("y", "Y", "worker").depends_on("root"))
        .with_step(WorkflowStep::new("z", "Z", "worker").depends_on("root"))
        .with_step(
            WorkflowStep::new("join", "Join", "worker")
                .depends_on("x")
                .depends_on("y")
                .depends_on("z"),
        );
    assert!(engine.start_workflow(wf).await.success);
    let view = engine
        .wait_for_terminal("wf-par", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(view.status, WorkflowStatus::Completed);

    let log = trace.log.lock().await.clone();
    for middle in ["x", "y", "z"] {
        assert!(position(&log, "root", "end") < position(&log, middle, "start"));
        assert!(position(&log, middle, "end") < position(&log, "join", "start"));
    }
    assert_eq!(trace.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn parallel_level_failure_settles_level_and_skips_dependents() {
    let trace = Arc::new(Trace::default());
    let engine = engine(
        tracing_agent(Arc::clone(&trace), Duration::from_millis(20), Some("bad")),
        config(CoordinationStrategy::Parallel),
    )
    .await;

    let wf = Workflow::new("wf-partial", "Partial failure")
        .with_step(WorkflowStep::new("good", "Good", "worker"))
        .with_step(WorkflowStep::new("bad", "Bad", "worker"))
        .with_step(
            WorkflowStep::new("after", "After", "worker")
                .depends_on("good")
                .depends_on("bad"),
        );
    engine.start_workflow(wf).await;
    let view = engine
        .wait_for_terminal("wf-partial", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(view.status, WorkflowStatus::Failed);

    let workflow = engine.get_workflow("wf-partial").await.unwrap();
    assert_eq!(workflow.step("good").unwrap().status, StepStatus::Completed);
    assert_eq!(workflow.step("bad").unwrap().status, StepStatus::Failed);
    assert_eq!(workflow.step("after").unwrap().status, StepStatus::Pending);
    assert!(workflow.error.unwrap().contains("bad"));

    let stats = engine.get_stats().await;
    assert_eq!(stats.failed_workflows, 1);
    assert_eq!(stats.total_steps_executed, 2);
}
