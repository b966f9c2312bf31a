//! Message Router
//!
//! Validates a message, resolves it to one agent (explicit target or
//! capability lookup with least-loaded selection), dispatches it to that
//! agent's executor and normalizes the outcome into a [`Response`].
//!
//! Routing never returns `Err`: every failure is a `Response` with
//! `success == false` and an [`ErrorCode`].

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tessera_core::{AgentDescriptor, AgentStatus, ErrorCode, Message, MessageType, Resolution, Response};
use tokio::sync::{Mutex, RwLock, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::registry::AgentRegistry;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the message router.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Largest accepted JSON-encoded content, in bytes
    pub message_max_size: usize,
    /// Default executor timeout; `None` waits indefinitely
    pub executor_timeout: Option<Duration>,
    /// Message type to capability tag
    pub capability_map: HashMap<MessageType, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            message_max_size: 1024 * 1024,
            executor_timeout: Some(Duration::from_secs(30)),
            capability_map: Self::default_capability_map(),
        }
    }
}

impl RouterConfig {
    /// The standard operation → capability table.
    pub fn default_capability_map() -> HashMap<MessageType, String> {
        use MessageType::*;
        [
            (GenerateCode, "code_generation"),
            (AnalyzeCode, "code_analysis"),
            (RefactorCode, "code_refactoring"),
            (GenerateTests, "testing"),
            (RunTests, "testing"),
            (AnalyzeCoverage, "testing"),
            (DeployApplication, "deployment"),
            (RollbackDeployment, "deployment"),
            (ScaleApplication, "deployment"),
            (AnalyzeRequirements, "business_analysis"),
            (GatherStakeholderNeeds, "business_analysis"),
            (AnalyzeBusinessProcess, "business_analysis"),
            (CreateUserStories, "business_analysis"),
            (CreateAcceptanceCriteria, "business_analysis"),
        ]
        .into_iter()
        .map(|(t, c)| (t, c.to_string()))
        .collect()
    }

    /// Map (or remap) a message type to a capability.
    pub fn with_capability_mapping(
        mut self,
        message_type: MessageType,
        capability: impl Into<String>,
    ) -> Self {
        self.capability_map.insert(message_type, capability.into());
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.message_max_size = bytes;
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor_timeout = timeout;
        self
    }

    pub fn capability_for(&self, message_type: MessageType) -> Option<&str> {
        self.capability_map.get(&message_type).map(String::as_str)
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// Running routing counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub messages_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_processing_ms: f64,
    pub max_processing_ms: f64,
    pub min_processing_ms: Option<f64>,
}

impl RouterStats {
    fn record(&mut self, success: bool, elapsed_ms: f64) {
        self.messages_processed += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        let n = self.messages_processed as f64;
        self.avg_processing_ms += (elapsed_ms - self.avg_processing_ms) / n;
        self.max_processing_ms = self.max_processing_ms.max(elapsed_ms);
        self.min_processing_ms = Some(
            self.min_processing_ms
                .map_or(elapsed_ms, |min| min.min(elapsed_ms)),
        );
    }
}

/// An executor call currently running for a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightDispatch {
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
}

/// One dispatch of a message. Redelivering a message to the same agent
/// creates a second entry with its own token.
struct InFlight {
    token: u64,
    agent_id: String,
    cancel: Option<oneshot::Sender<()>>,
    started_at: DateTime<Utc>,
}

/// Why resolution failed.
struct RouteFailure {
    code: ErrorCode,
    error: String,
}

impl RouteFailure {
    fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }

    fn into_response(self, message_id: &str) -> Response {
        Response::failure(message_id, self.code, self.error)
    }
}

// ============================================================================
// Message Router
// ============================================================================

/// Routes messages to registered agents.
pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    config: RouterConfig,
    stats: RwLock<RouterStats>,
    in_flight: InFlightTable,
    next_token: AtomicU64,
}

impl MessageRouter {
    pub fn new(registry: Arc<AgentRegistry>, config: RouterConfig) -> Self {
        Self {
            registry,
            config,
            stats: RwLock::new(RouterStats::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route a message to exactly one agent.
    pub async fn route_message(&self, message: Message) -> Response {
        let started = Instant::now();
        let response = self.route(&message).await;
        self.stats
            .write()
            .await
            .record(response.success, elapsed_ms(started));
        response
    }

    /// Route a message on behalf of a workflow, stamping the workflow id on
    /// both the message and the response.
    pub async fn route_workflow_message(&self, mut message: Message, workflow_id: &str) -> Response {
        message.workflow_id = Some(workflow_id.to_string());
        message
            .metadata
            .insert("workflow_id".to_string(), json!(workflow_id));

        self.route_message(message)
            .await
            .with_metadata("workflow_id", workflow_id)
    }

    /// Dispatch concurrently to every agent with `capability`, or to every
    /// available agent when no capability is given. Only successful
    /// responses are returned; one agent failing does not affect the others.
    pub async fn broadcast_message(
        &self,
        message: Message,
        capability: Option<&str>,
    ) -> Vec<Response> {
        if let Err(reason) = self.validate(&message) {
            warn!(message_id = %message.message_id, reason = %reason, "Rejected broadcast message");
            return Vec::new();
        }

        let targets: Vec<AgentDescriptor> = match capability {
            Some(capability) => self.registry.discover(capability).await,
            None => self.registry.available_agents().await,
        };

        info!(
            message_id = %message.message_id,
            capability = capability.unwrap_or("*"),
            targets = targets.len(),
            "Broadcasting message"
        );

        let dispatches = targets.iter().map(|agent| {
            let mut copy = message.clone();
            copy.target_agent_id = Some(agent.agent_id.clone());
            async move {
                let started = Instant::now();
                let response = self.dispatch(&agent.agent_id, &copy).await;
                self.stats
                    .write()
                    .await
                    .record(response.success, elapsed_ms(started));
                response
            }
        });

        join_all(dispatches)
            .await
            .into_iter()
            .filter(|r| r.success)
            .collect()
    }

    pub async fn get_stats(&self) -> RouterStats {
        self.stats.read().await.clone()
    }

    /// Dispatches currently processing `message_id`, one per executor call.
    pub async fn message_status(&self, message_id: &str) -> Vec<InFlightDispatch> {
        let in_flight = self.in_flight.lock().await;
        let mut dispatches: Vec<InFlightDispatch> = in_flight
            .get(message_id)
            .into_iter()
            .flatten()
            .map(|f| InFlightDispatch {
                agent_id: f.agent_id.clone(),
                started_at: f.started_at,
            })
            .collect();
        dispatches.sort_by(|a, b| {
            a.agent_id
                .cmp(&b.agent_id)
                .then(a.started_at.cmp(&b.started_at))
        });
        dispatches
    }

    /// Cancel every running dispatch of `message_id`. Returns false if none
    /// was running.
    pub async fn cancel_message(&self, message_id: &str) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        let Some(dispatches) = in_flight.get_mut(message_id) else {
            return false;
        };
        let mut cancelled = false;
        for dispatch in dispatches.iter_mut() {
            if let Some(cancel) = dispatch.cancel.take() {
                info!(message_id = %message_id, agent_id = %dispatch.agent_id, "Cancelling dispatch");
                cancelled |= cancel.send(()).is_ok();
            }
        }
        cancelled
    }

    // ------------------------------------------------------------------------
    // Pipeline stages
    // ------------------------------------------------------------------------

    async fn route(&self, message: &Message) -> Response {
        if let Err(reason) = self.validate(message) {
            debug!(message_id = %message.message_id, reason = %reason, "Invalid message");
            return Response::failure(&message.message_id, ErrorCode::InvalidMessage, reason);
        }

        let resolved = match message.resolution() {
            Resolution::Direct(agent_id) => self.resolve_direct(agent_id).await,
            Resolution::ByCapability(message_type) => self.resolve_by_capability(message_type).await,
        };

        match resolved {
            Ok(agent_id) => self.dispatch(&agent_id, message).await,
            Err(failure) => {
                debug!(
                    message_id = %message.message_id,
                    error_code = %failure.code,
                    error = %failure.error,
                    "Message could not be resolved"
                );
                failure.into_response(&message.message_id)
            }
        }
    }

    fn validate(&self, message: &Message) -> Result<(), String> {
        if message.message_id.trim().is_empty() {
            return Err("message_id is required".to_string());
        }
        if message
            .target_agent_id
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err("target_agent_id must not be empty".to_string());
        }
        let size = message.content_size();
        if size > self.config.message_max_size {
            return Err(format!(
                "content size {size} exceeds maximum {}",
                self.config.message_max_size
            ));
        }
        if message.is_expired() {
            return Err("message has expired".to_string());
        }
        Ok(())
    }

    async fn resolve_direct(&self, agent_id: &str) -> Result<String, RouteFailure> {
        let Some(agent) = self.registry.get_agent(agent_id).await else {
            return Err(RouteFailure::new(
                ErrorCode::AgentNotFound,
                format!("Agent {agent_id} not found"),
            ));
        };
        if !self.registry.is_healthy(agent_id).await {
            return Err(RouteFailure::new(
                ErrorCode::AgentUnhealthy,
                format!("Agent {agent_id} is unhealthy"),
            ));
        }
        if !is_suitable(&agent) {
            return Err(RouteFailure::new(
                ErrorCode::NoSuitableAgent,
                format!("Agent {agent_id} cannot accept work ({})", agent.status),
            ));
        }
        Ok(agent.agent_id)
    }

    async fn resolve_by_capability(&self, message_type: MessageType) -> Result<String, RouteFailure> {
        let Some(capability) = self.config.capability_for(message_type) else {
            return Err(RouteFailure::new(
                ErrorCode::UnknownMessageType,
                format!("No capability mapped for message type {message_type}"),
            ));
        };

        // Remote-only and stale members are dropped by discovery
        let candidates = self.registry.discover(capability).await;
        if candidates.is_empty() {
            return Err(RouteFailure::new(
                ErrorCode::NoAgentsFound,
                format!("No agents found for capability {capability}"),
            ));
        }

        // Least loaded; min_by_key keeps the first of equal candidates
        candidates
            .into_iter()
            .filter(is_suitable)
            .min_by_key(|a| a.current_runs)
            .map(|a| a.agent_id)
            .ok_or_else(|| {
                RouteFailure::new(
                    ErrorCode::NoSuitableAgent,
                    format!("All agents for capability {capability} are at capacity"),
                )
            })
    }

    /// Run the agent's executor and wrap the outcome.
    ///
    /// The executor runs on its own task, which also returns the run slot
    /// and clears the in-flight entry. Dropping this future therefore never
    /// leaks an agent slot.
    async fn dispatch(&self, agent_id: &str, message: &Message) -> Response {
        let message_id = message.message_id.as_str();
        let started = Instant::now();

        let executor = match self.registry.acquire_run(agent_id).await {
            Ok(executor) => executor,
            Err(e) => {
                warn!(message_id = %message_id, agent_id = %agent_id, error = %e, "Could not reserve agent");
                let code = match &e {
                    // Resolved, then unregistered before it could be reserved
                    AgentError::AgentNotFound(_) => ErrorCode::NoAgentInstances,
                    _ => ErrorCode::RoutingError,
                };
                return Response::failure(message_id, code, e.to_string())
                    .with_metadata("agent_id", agent_id);
            }
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.in_flight
            .lock()
            .await
            .entry(message_id.to_string())
            .or_default()
            .push(InFlight {
                token,
                agent_id: agent_id.to_string(),
                cancel: Some(cancel_tx),
                started_at: Utc::now(),
            });

        let timeout = executor_timeout(message.timeout_secs, self.config.executor_timeout);
        let owned = message.clone();
        let owned_agent = agent_id.to_string();
        let registry = Arc::clone(&self.registry);
        let in_flight = Arc::clone(&self.in_flight);

        let task = tokio::spawn(async move {
            let call = async {
                let handled = AssertUnwindSafe(executor.handle_message(&owned)).catch_unwind();
                let result = match timeout {
                    Some(limit) => tokio::time::timeout(limit, handled)
                        .await
                        .unwrap_or(Ok(Err(AgentError::Timeout(limit)))),
                    None => handled.await,
                };
                result.unwrap_or_else(|_| Err(AgentError::Internal("executor panicked".to_string())))
            };

            // A dropped sender is not a cancellation, so only `Ok` ends the call
            let outcome = tokio::select! {
                result = call => result,
                Ok(()) = cancel_rx => Err(AgentError::Cancelled),
            };

            untrack(&in_flight, &owned.message_id, token).await;

            let agent_failed = matches!(&outcome, Err(e) if !matches!(e, AgentError::Cancelled));
            if let Err(e) = registry.release_run(&owned_agent, !agent_failed).await {
                debug!(agent_id = %owned_agent, error = %e, "Agent left before its run was released");
            }
            outcome
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AgentError::Internal(format!("dispatch task failed: {e}"))),
        };

        let processing_ms = elapsed_ms(started);
        match outcome {
            Ok(response) => {
                debug!(
                    message_id = %message_id,
                    agent_id = %agent_id,
                    success = response.success,
                    processing_ms,
                    "Dispatch complete"
                );
                response
                    .correlate(message_id)
                    .with_processing_time(processing_ms)
                    .with_metadata("agent_id", agent_id)
            }
            Err(e) => {
                error!(
                    message_id = %message_id,
                    agent_id = %agent_id,
                    error = %e,
                    "Agent executor failed"
                );
                let mut details = Map::new();
                details.insert("agent_id".to_string(), json!(agent_id));
                details.insert("cause".to_string(), json!(e.error_code()));
                Response::failure(
                    message_id,
                    ErrorCode::AgentCommunicationError,
                    format!("Agent {agent_id} failed: {e}"),
                )
                .with_error_details(details)
                .with_processing_time(processing_ms)
                .with_metadata("agent_id", agent_id)
            }
        }
    }
}

type InFlightTable = Arc<Mutex<HashMap<String, Vec<InFlight>>>>;

async fn untrack(in_flight: &InFlightTable, message_id: &str, token: u64) {
    let mut in_flight = in_flight.lock().await;
    if let Some(dispatches) = in_flight.get_mut(message_id) {
        dispatches.retain(|d| d.token != token);
        if dispatches.is_empty() {
            in_flight.remove(message_id);
        }
    }
}

/// A per-message timeout of zero disables the limit for that message;
/// no per-message timeout falls back to the router default.
fn executor_timeout(message_secs: Option<u64>, default: Option<Duration>) -> Option<Duration> {
    match message_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => default,
    }
}

fn is_suitable(agent: &AgentDescriptor) -> bool {
    agent.has_capacity() && !matches!(agent.status, AgentStatus::Offline | AgentStatus::Maintenance)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// ============================================================================
// Tests
// ============================================================================
