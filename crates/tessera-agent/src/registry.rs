//! Agent Registry
//!
//! Tracks live agent instances, their capabilities and health, and mirrors
//! that state into the shared [`StateCache`] so other processes can discover
//! agents registered here.
//!
//! # Health
//!
//! An agent is healthy while its last-seen time is recent. `register`,
//! `heartbeat`, `update_status` and every dispatch (`acquire_run` and
//! `release_run`) refresh last-seen; a health check only reads it. An agent is stale once `now - last_seen > 2 × health_check_timeout`.
//!
//! # Cache mirroring
//!
//! In-process maps are authoritative for this process. Cache writes are
//! best-effort: failures are logged and never fail the registry operation.
//! The capability set merge on registration is read-modify-write, so two
//! processes registering different agents under one capability at the same
//! moment may lose one member until the next registration or heartbeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tessera_cache::{CacheResult, StateCache};
use tessera_core::{
    AgentDescriptor, AgentMetadataRecord, AgentStatus, AgentStatusRecord, EventBus, EventType,
    LifecycleEvent,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::executor::AgentExecutor;
use crate::task::{BackgroundTaskHandle, spawn_periodic};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the agent registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// How often the health loop runs
    pub health_check_interval: Duration,
    /// Staleness threshold is twice this value
    pub health_check_timeout: Duration,
    /// Run the discovery sweep loop
    pub discovery_enabled: bool,
    /// How often the discovery loop runs
    pub discovery_interval: Duration,
    /// Pause after a failed loop iteration
    pub loop_backoff: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(10),
            discovery_enabled: true,
            discovery_interval: Duration::from_secs(30),
            loop_backoff: Duration::from_secs(1),
        }
    }
}

impl RegistryConfig {
    /// Age after which an agent without a heartbeat is unhealthy.
    pub fn stale_after(&self) -> Duration {
        self.health_check_timeout.saturating_mul(2)
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// Aggregate counts over registered agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetrics {
    pub total_agents: usize,
    pub online_agents: usize,
    pub busy_agents: usize,
    pub error_agents: usize,
    pub healthy_agents: usize,
    pub capabilities_count: usize,
    pub last_updated: DateTime<Utc>,
}

struct AgentEntry {
    descriptor: AgentDescriptor,
    executor: Arc<dyn AgentExecutor>,
    healthy: bool,
    last_seen: DateTime<Utc>,
    /// Registration order, used for stable discovery order
    seq: u64,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, AgentEntry>,
    capabilities: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl RegistryState {
    fn index(&mut self, agent_id: &str, capabilities: &[String]) {
        for capability in capabilities {
            self.capabilities
                .entry(capability.clone())
                .or_default()
                .insert(agent_id.to_string());
        }
    }

    fn unindex(&mut self, agent_id: &str, capabilities: &[String]) {
        for capability in capabilities {
            if let Some(members) = self.capabilities.get_mut(capability) {
                members.remove(agent_id);
                if members.is_empty() {
                    self.capabilities.remove(capability);
                }
            }
        }
    }

    fn ordered(&self) -> Vec<&AgentEntry> {
        let mut entries: Vec<_> = self.agents.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}

/// A status transition observed while holding the registry lock.
struct StatusChange {
    record: AgentStatusRecord,
    old: AgentStatus,
    new: AgentStatus,
    last_seen: DateTime<Utc>,
}

// ============================================================================
// Agent Registry
// ============================================================================

/// Registry of live agents and their capability index.
pub struct AgentRegistry {
    config: RegistryConfig,
    state: RwLock<RegistryState>,
    cache: Option<StateCache>,
    events: EventBus,
}

impl AgentRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RegistryState::default()),
            cache: None,
            events: EventBus::default(),
        }
    }

    /// Mirror registry state into a shared cache.
    pub fn with_cache(mut self, cache: StateCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Publish lifecycle events on an existing bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register an agent, replacing any previous registration with the same id.
    pub async fn register(
        &self,
        mut descriptor: AgentDescriptor,
        executor: Arc<dyn AgentExecutor>,
    ) -> AgentResult<()> {
        if descriptor.agent_id.trim().is_empty() {
            return Err(AgentError::InvalidAgent("agent_id is required".to_string()));
        }
        if descriptor.agent_name.trim().is_empty() {
            return Err(AgentError::InvalidAgent(
                "agent_name is required".to_string(),
            ));
        }

        let now = Utc::now();
        descriptor.status = AgentStatus::Online;
        descriptor.current_runs = 0;
        descriptor.last_heartbeat = Some(now);

        let agent_id = descriptor.agent_id.clone();
        let dropped: Vec<String> = {
            let mut state = self.state.write().await;
            let existing = state
                .agents
                .get(&agent_id)
                .map(|e| (e.seq, e.descriptor.capabilities.clone()));
            let (seq, previous) = match existing {
                Some(existing) => {
                    warn!(agent_id = %agent_id, "Agent already registered, overwriting");
                    existing
                }
                None => {
                    state.next_seq += 1;
                    (state.next_seq, Vec::new())
                }
            };

            state.unindex(&agent_id, &previous);
            state.index(&agent_id, &descriptor.capabilities);
            state.agents.insert(
                agent_id.clone(),
                AgentEntry {
                    descriptor: descriptor.clone(),
                    executor,
                    healthy: true,
                    last_seen: now,
                    seq,
                },
            );

            previous
                .into_iter()
                .filter(|c| !descriptor.has_capability(c))
                .collect()
        };

        info!(
            agent_id = %agent_id,
            capabilities = ?descriptor.capabilities,
            "Registered agent"
        );

        if let Err(e) = self.mirror_registration(&descriptor, &dropped, now).await {
            warn!(agent_id = %agent_id, error = %e, "Failed to mirror registration to cache");
        }

        self.events.emit(LifecycleEvent::agent(
            EventType::AgentRegistered,
            &agent_id,
            json!({
                "agent_name": descriptor.agent_name,
                "capabilities": descriptor.capabilities,
            }),
        ));

        Ok(())
    }

    async fn mirror_registration(
        &self,
        descriptor: &AgentDescriptor,
        dropped: &[String],
        now: DateTime<Utc>,
    ) -> CacheResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let agent_id = &descriptor.agent_id;

        cache
            .cache_agent_status(agent_id, &AgentStatusRecord::from_descriptor(descriptor, now))
            .await?;
        cache
            .cache_agent_metadata(&AgentMetadataRecord::from(descriptor))
            .await?;
        cache.update_agent_heartbeat(agent_id, now).await?;

        for capability in dropped {
            cache.remove_agent_from_capability(capability, agent_id).await?;
        }

        // Read-modify-write merge with agents other processes registered
        for capability in &descriptor.capabilities {
            let mut members = cache.discover_agents_by_capability(capability).await?;
            if !members.contains(agent_id) {
                members.push(agent_id.clone());
            }
            cache.cache_capability_mapping(capability, &members).await?;
        }

        Ok(())
    }

    /// Remove an agent from every index. Fails if the id is unknown.
    pub async fn unregister(&self, agent_id: &str) -> AgentResult<()> {
        let entry = {
            let mut state = self.state.write().await;
            let entry = state
                .agents
                .remove(agent_id)
                .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
            state.unindex(agent_id, &entry.descriptor.capabilities);
            entry
        };

        info!(agent_id = %agent_id, "Unregistered agent");

        if let Some(cache) = &self.cache {
            for capability in &entry.descriptor.capabilities {
                if let Err(e) = cache.remove_agent_from_capability(capability, agent_id).await {
                    warn!(agent_id = %agent_id, capability = %capability, error = %e, "Failed to update cached capability set");
                }
            }
            if let Err(e) = cache.clear_agent_cache(agent_id).await {
                warn!(agent_id = %agent_id, error = %e, "Failed to clear cached agent records");
            }
        }

        self.events.emit(LifecycleEvent::agent(
            EventType::AgentUnregistered,
            agent_id,
            json!({ "agent_name": entry.descriptor.agent_name }),
        ));

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Discovery and queries
    // ------------------------------------------------------------------------

    /// Agent ids advertising `capability`, from the cache index when it has
    /// any, otherwise from the local index. Not filtered by health or locality.
    pub async fn capability_members(&self, capability: &str) -> Vec<String> {
        if let Some(cache) = &self.cache {
            match cache.discover_agents_by_capability(capability).await {
                Ok(members) if !members.is_empty() => return members,
                Ok(_) => {}
                Err(e) => {
                    warn!(capability = %capability, error = %e, "Cache discovery failed, using local index");
                }
            }
        }

        let state = self.state.read().await;
        let mut members: Vec<&AgentEntry> = state
            .capabilities
            .get(capability)
            .into_iter()
            .flatten()
            .filter_map(|id| state.agents.get(id))
            .collect();
        members.sort_by_key(|e| e.seq);
        members
            .into_iter()
            .map(|e| e.descriptor.agent_id.clone())
            .collect()
    }

    /// Healthy local agents advertising `capability`, in registration order.
    pub async fn discover(&self, capability: &str) -> Vec<AgentDescriptor> {
        let members = self.capability_members(capability).await;

        let state = self.state.read().await;
        let mut found: Vec<&AgentEntry> = members
            .iter()
            .filter_map(|id| state.agents.get(id))
            .filter(|e| e.healthy && e.descriptor.has_capability(capability))
            .collect();
        found.sort_by_key(|e| e.seq);
        found.dedup_by_key(|e| e.seq);

        debug!(capability = %capability, found = found.len(), "Discovered agents");
        found.into_iter().map(|e| e.descriptor.clone()).collect()
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|e| e.descriptor.clone())
    }

    pub async fn executor(&self, agent_id: &str) -> Option<Arc<dyn AgentExecutor>> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|e| Arc::clone(&e.executor))
    }

    /// Registered agents in registration order, optionally filtered by status.
    pub async fn list_agents(&self, status: Option<AgentStatus>) -> Vec<AgentDescriptor> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(|e| status.is_none_or(|s| e.descriptor.status == s))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Healthy agents that are online or busy, in registration order.
    pub async fn available_agents(&self) -> Vec<AgentDescriptor> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(|e| {
                e.healthy
                    && matches!(e.descriptor.status, AgentStatus::Online | AgentStatus::Busy)
            })
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// False for unknown agents.
    pub async fn is_healthy(&self, agent_id: &str) -> bool {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .is_some_and(|e| e.healthy)
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.state.read().await.agents.contains_key(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ------------------------------------------------------------------------
    // Status and liveness
    // ------------------------------------------------------------------------

    /// Set an agent's status and refresh its last-seen time.
    pub async fn update_status(&self, agent_id: &str, status: AgentStatus) -> AgentResult<()> {
        let change = {
            let mut state = self.state.write().await;
            let entry = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
            let now = Utc::now();
            let old = entry.descriptor.status;
            entry.descriptor.status = status;
            entry.descriptor.last_heartbeat = Some(now);
            entry.last_seen = now;
            StatusChange {
                record: AgentStatusRecord::from_descriptor(&entry.descriptor, now),
                old,
                new: status,
                last_seen: now,
            }
        };

        self.publish_status(agent_id, change, true).await;
        Ok(())
    }

    /// Record a heartbeat: refresh last-seen and mark the agent healthy.
    pub async fn heartbeat(&self, agent_id: &str) -> AgentResult<()> {
        let (record, now) = {
            let mut state = self.state.write().await;
            let entry = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
            let now = Utc::now();
            entry.last_seen = now;
            entry.healthy = true;
            entry.descriptor.last_heartbeat = Some(now);
            (AgentStatusRecord::from_descriptor(&entry.descriptor, now), now)
        };

        debug!(agent_id = %agent_id, "Heartbeat received");

        if let Some(cache) = &self.cache {
            let result = async {
                cache.update_agent_heartbeat(agent_id, now).await?;
                cache.cache_agent_status(agent_id, &record).await
            }
            .await;
            if let Err(e) = result {
                warn!(agent_id = %agent_id, error = %e, "Failed to mirror heartbeat to cache");
            }
        }
        Ok(())
    }

    /// Reserve a run slot, mark the agent busy and refresh its last-seen time.
    ///
    /// Returns the agent's executor. Every successful call must be paired
    /// with [`release_run`](Self::release_run).
    pub async fn acquire_run(&self, agent_id: &str) -> AgentResult<Arc<dyn AgentExecutor>> {
        let (executor, change) = {
            let mut state = self.state.write().await;
            let entry = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
            if !entry.descriptor.has_capacity() {
                return Err(AgentError::AtCapacity(agent_id.to_string()));
            }
            let now = Utc::now();
            let old = entry.descriptor.status;
            entry.descriptor.current_runs += 1;
            entry.descriptor.status = AgentStatus::Busy;
            entry.descriptor.last_heartbeat = Some(now);
            entry.last_seen = now;
            (
                Arc::clone(&entry.executor),
                StatusChange {
                    record: AgentStatusRecord::from_descriptor(&entry.descriptor, now),
                    old,
                    new: AgentStatus::Busy,
                    last_seen: now,
                },
            )
        };

        self.publish_status(agent_id, change, true).await;
        Ok(executor)
    }

    /// Return a run slot and refresh last-seen. A failed run marks the agent
    /// `error`; otherwise it goes back to `online` once no runs remain.
    pub async fn release_run(&self, agent_id: &str, succeeded: bool) -> AgentResult<()> {
        let change = {
            let mut state = self.state.write().await;
            let entry = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
            let old = entry.descriptor.status;
            entry.descriptor.current_runs = entry.descriptor.current_runs.saturating_sub(1);
            let new = if !succeeded {
                AgentStatus::Error
            } else if entry.descriptor.current_runs == 0 {
                AgentStatus::Online
            } else {
                AgentStatus::Busy
            };
            let now = Utc::now();
            entry.descriptor.status = new;
            entry.descriptor.last_heartbeat = Some(now);
            entry.last_seen = now;
            StatusChange {
                record: AgentStatusRecord::from_descriptor(&entry.descriptor, now),
                old,
                new,
                last_seen: now,
            }
        };

        self.publish_status(agent_id, change, true).await;
        Ok(())
    }

    async fn publish_status(&self, agent_id: &str, change: StatusChange, heartbeat: bool) {
        if let Some(cache) = &self.cache {
            let result = async {
                cache.cache_agent_status(agent_id, &change.record).await?;
                if heartbeat {
                    cache.update_agent_heartbeat(agent_id, change.last_seen).await?;
                }
                Ok::<_, tessera_cache::CacheError>(())
            }
            .await;
            if let Err(e) = result {
                warn!(agent_id = %agent_id, error = %e, "Failed to mirror agent status to cache");
            }
        }

        if change.old != change.new {
            debug!(
                agent_id = %agent_id,
                old_status = %change.old,
                new_status = %change.new,
                "Agent status changed"
            );
            self.events.emit(LifecycleEvent::agent(
                EventType::AgentStatusChanged,
                agent_id,
                json!({ "old_status": change.old, "new_status": change.new }),
            ));
        }
    }

    /// Recompute health for every agent from last-seen recency.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let now = Utc::now();
        let stale_after = self.config.stale_after();
        let mut results = HashMap::new();
        let mut newly_unhealthy = Vec::new();

        {
            let mut state = self.state.write().await;
            for (agent_id, entry) in state.agents.iter_mut() {
                let age = (now - entry.last_seen).to_std().unwrap_or(Duration::ZERO);
                let healthy = age <= stale_after;
                if entry.healthy && !healthy {
                    newly_unhealthy.push((agent_id.clone(), entry.last_seen));
                }
                entry.healthy = healthy;
                results.insert(agent_id.clone(), healthy);
            }
        }

        for (agent_id, last_seen) in newly_unhealthy {
            warn!(agent_id = %agent_id, last_seen = %last_seen, "Agent failed health check");
            self.events.emit(LifecycleEvent::agent(
                EventType::AgentHealthCheckFailed,
                &agent_id,
                json!({
                    "last_seen": last_seen,
                    "stale_after_secs": stale_after.as_secs_f64(),
                }),
            ));
        }

        results
    }

    pub async fn get_metrics(&self) -> RegistryMetrics {
        let state = self.state.read().await;
        let count_status = |status: AgentStatus| {
            state
                .agents
                .values()
                .filter(|e| e.descriptor.status == status)
                .count()
        };

        RegistryMetrics {
            total_agents: state.agents.len(),
            online_agents: count_status(AgentStatus::Online),
            busy_agents: count_status(AgentStatus::Busy),
            error_agents: count_status(AgentStatus::Error),
            healthy_agents: state.agents.values().filter(|e| e.healthy).count(),
            capabilities_count: state.capabilities.len(),
            last_updated: Utc::now(),
        }
    }

    /// Agent ids present in the cache but not registered in this process.
    pub async fn discovery_sweep(&self) -> AgentResult<Vec<String>> {
        let Some(cache) = &self.cache else {
            return Ok(Vec::new());
        };
        let cached = cache.cached_agent_ids().await?;

        let state = self.state.read().await;
        let mut remote: Vec<String> = cached
            .into_iter()
            .filter(|id| !state.agents.contains_key(id))
            .collect();
        remote.sort();

        if !remote.is_empty() {
            debug!(remote = ?remote, "Discovery sweep found agents registered elsewhere");
        }
        Ok(remote)
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    pub fn start_health_checks(self: &Arc<Self>) -> BackgroundTaskHandle {
        let registry = Arc::clone(self);
        spawn_periodic(
            "agent_health_check",
            self.config.health_check_interval,
            self.config.loop_backoff,
            move || {
                let registry = Arc::clone(&registry);
                async move {
                    let results = registry.health_check_all().await;
                    let unhealthy = results.values().filter(|h| !**h).count();
                    debug!(checked = results.len(), unhealthy, "Health check complete");
                    Ok(())
                }
            },
        )
    }

    pub fn start_discovery(self: &Arc<Self>) -> BackgroundTaskHandle {
        let registry = Arc::clone(self);
        spawn_periodic(
            "agent_discovery",
            self.config.discovery_interval,
            self.config.loop_backoff,
            move || {
                let registry = Arc::clone(&registry);
                async move { registry.discovery_sweep().await.map(|_| ()) }
            },
        )
    }

    /// Start the health loop and, when enabled, the discovery loop.
    pub fn start_background_tasks(self: &Arc<Self>) -> RegistryTasks {
        RegistryTasks {
            health: self.start_health_checks(),
            discovery: self
                .config
                .discovery_enabled
                .then(|| self.start_discovery()),
        }
    }
}

/// Handles for the registry's background loops.
#[derive(Debug)]
pub struct RegistryTasks {
    health: BackgroundTaskHandle,
    discovery: Option<BackgroundTaskHandle>,
}

impl RegistryTasks {
    /// Stop every loop.
    pub fn stop(self) {
        self.health.stop();
        if let Some(discovery) = self.discovery {
            discovery.stop();
        }
    }

    pub fn discovery_running(&self) -> bool {
        self.discovery.as_ref().is_some_and(|d| !d.is_finished())
    }
}

// ============================================================================
// Tests
// ============================================================================
