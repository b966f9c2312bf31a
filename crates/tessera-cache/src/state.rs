//! Domain-level cache used for cross-process coordination.
//!
//! [`StateCache`] maps agent, capability and workflow records onto a
//! [`StateStore`] under a common key prefix. In-process maps in the registry
//! and engine stay the source of truth; everything written here is a shared,
//! expiring mirror other processes can read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{
    AgentMetadataRecord, AgentStatus, AgentStatusRecord, StepSnapshot, Workflow, WorkflowSnapshot,
    WorkflowStatus,
};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::memory::InMemoryStore;
use crate::pipeline::Pipeline;
use crate::store::{StateStore, escape_glob};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "acp:";

/// Expiry applied to each record family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtls {
    pub agent_status: Duration,
    pub agent_metadata: Duration,
    pub workflow_state: Duration,
    pub capability_mapping: Duration,
    pub system_metrics: Duration,
    pub workflow_template: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            agent_status: Duration::from_secs(300),
            agent_metadata: Duration::from_secs(3600),
            workflow_state: Duration::from_secs(1800),
            capability_mapping: Duration::from_secs(600),
            system_metrics: Duration::from_secs(60),
            workflow_template: Duration::from_secs(3600),
        }
    }
}

/// Aggregate view derived by scanning cached records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub active_workflows: usize,
    pub cache_hit_ratio: f64,
    pub agent_status_distribution: BTreeMap<AgentStatus, usize>,
}

/// Typed, prefixed access to the shared state store.
#[derive(Clone)]
pub struct StateCache {
    store: Arc<dyn StateStore>,
    prefix: String,
    ttls: CacheTtls,
}

impl std::fmt::Debug for StateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCache")
            .field("prefix", &self.prefix)
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}

impl StateCache {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            ttls: CacheTtls::default(),
        }
    }

    /// Cache backed by a fresh [`InMemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> CacheResult<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache prefix must not be empty".to_string(),
            ));
        }
        self.prefix = prefix;
        Ok(self)
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    // ========================================================================
    // Keys
    // ========================================================================

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    fn agent_status_key(&self, agent_id: &str) -> String {
        self.key(&format!("agents:status:{agent_id}"))
    }

    fn heartbeat_key(&self, agent_id: &str) -> String {
        self.key(&format!("agents:heartbeat:{agent_id}"))
    }

    fn agent_metadata_key(&self, agent_id: &str) -> String {
        self.key(&format!("cache:agents:{agent_id}"))
    }

    fn capability_key(&self, capability: &str) -> String {
        self.key(&format!("capabilities:{capability}"))
    }

    fn workflow_key(&self, workflow_id: &str) -> String {
        self.key(&format!("workflows:active:{workflow_id}"))
    }

    fn step_key(&self, workflow_id: &str, step_id: &str) -> String {
        self.key(&format!("workflows:steps:{workflow_id}:{step_id}"))
    }

    fn template_key(&self, template_id: &str) -> String {
        self.key(&format!("cache:templates:{template_id}"))
    }

    fn metrics_key(&self, component: &str) -> String {
        self.key(&format!("metrics:{component}"))
    }

    // ========================================================================
    // JSON helpers
    // ========================================================================

    async fn put_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.store.set(key, &encoded, Some(ttl)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read every JSON record under a pattern, skipping records that vanished
    /// or fail to decode.
    async fn scan_json<T: DeserializeOwned>(&self, pattern: &str) -> CacheResult<Vec<T>> {
        let mut records = Vec::new();
        for key in self.store.keys(pattern).await? {
            match self.get_json::<T>(&key).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable cache record"),
            }
        }
        Ok(records)
    }

    // ========================================================================
    // Agents
    // ========================================================================

    pub async fn cache_agent_status(
        &self,
        agent_id: &str,
        record: &AgentStatusRecord,
    ) -> CacheResult<()> {
        self.put_json(&self.agent_status_key(agent_id), record, self.ttls.agent_status)
            .await
    }

    pub async fn get_agent_status(&self, agent_id: &str) -> CacheResult<Option<AgentStatusRecord>> {
        self.get_json(&self.agent_status_key(agent_id)).await
    }

    pub async fn update_agent_heartbeat(
        &self,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> CacheResult<()> {
        self.put_json(&self.heartbeat_key(agent_id), &at, self.ttls.agent_status)
            .await
    }

    pub async fn get_agent_heartbeat(&self, agent_id: &str) -> CacheResult<Option<DateTime<Utc>>> {
        self.get_json(&self.heartbeat_key(agent_id)).await
    }

    pub async fn cache_agent_metadata(&self, record: &AgentMetadataRecord) -> CacheResult<()> {
        self.put_json(
            &self.agent_metadata_key(&record.agent_id),
            record,
            self.ttls.agent_metadata,
        )
        .await
    }

    pub async fn get_agent_metadata(
        &self,
        agent_id: &str,
    ) -> CacheResult<Option<AgentMetadataRecord>> {
        self.get_json(&self.agent_metadata_key(agent_id)).await
    }

    /// Ids of every agent with a live status record.
    pub async fn cached_agent_ids(&self) -> CacheResult<Vec<String>> {
        let status_prefix = self.agent_status_key("");
        let keys = self.store.keys(&prefix_pattern(&status_prefix)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&status_prefix).map(str::to_string))
            .collect())
    }

    // ========================================================================
    // Capabilities
    // ========================================================================

    /// Replace the agent set for a capability.
    ///
    /// This overwrites; callers that want to merge must read the current set
    /// first. Two processes merging concurrently can lose a member.
    pub async fn cache_capability_mapping(
        &self,
        capability: &str,
        agent_ids: &[String],
    ) -> CacheResult<()> {
        let pipeline = Pipeline::new().atomic().replace_set(
            self.capability_key(capability),
            agent_ids.to_vec(),
            self.ttls.capability_mapping,
        );
        self.store.execute(pipeline).await?;
        Ok(())
    }

    pub async fn discover_agents_by_capability(&self, capability: &str) -> CacheResult<Vec<String>> {
        self.store.smembers(&self.capability_key(capability)).await
    }

    pub async fn remove_agent_from_capability(
        &self,
        capability: &str,
        agent_id: &str,
    ) -> CacheResult<bool> {
        let removed = self
            .store
            .srem(&self.capability_key(capability), &[agent_id.to_string()])
            .await?;
        Ok(removed > 0)
    }

    pub async fn invalidate_capability(&self, capability: &str) -> CacheResult<bool> {
        let deleted = self.store.delete(&[self.capability_key(capability)]).await?;
        Ok(deleted > 0)
    }

    // ========================================================================
    // Workflows
    // ========================================================================

    pub async fn cache_workflow_state(
        &self,
        workflow_id: &str,
        snapshot: &WorkflowSnapshot,
    ) -> CacheResult<()> {
        self.put_json(&self.workflow_key(workflow_id), snapshot, self.ttls.workflow_state)
            .await
    }

    pub async fn get_workflow_state(&self, workflow_id: &str) -> CacheResult<Option<WorkflowSnapshot>> {
        self.get_json(&self.workflow_key(workflow_id)).await
    }

    /// Patch progress fields of an existing snapshot. Returns false if there
    /// is no snapshot to update.
    pub async fn update_workflow_progress(
        &self,
        workflow_id: &str,
        progress: u8,
        current_step: Option<&str>,
        completed_steps: Option<usize>,
    ) -> CacheResult<bool> {
        let Some(mut snapshot) = self.get_workflow_state(workflow_id).await? else {
            return Ok(false);
        };
        snapshot.progress = progress.min(100);
        snapshot.current_step = current_step.map(str::to_string);
        if let Some(completed) = completed_steps {
            snapshot.completed_steps = completed;
        }
        self.cache_workflow_state(workflow_id, &snapshot).await?;
        Ok(true)
    }

    pub async fn update_workflow_step(
        &self,
        workflow_id: &str,
        step_id: &str,
        snapshot: &StepSnapshot,
    ) -> CacheResult<()> {
        self.put_json(
            &self.step_key(workflow_id, step_id),
            snapshot,
            self.ttls.workflow_state,
        )
        .await
    }

    pub async fn get_workflow_step(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> CacheResult<Option<StepSnapshot>> {
        self.get_json(&self.step_key(workflow_id, step_id)).await
    }

    pub async fn cache_workflow_template(
        &self,
        template_id: &str,
        workflow: &Workflow,
    ) -> CacheResult<()> {
        self.put_json(
            &self.template_key(template_id),
            workflow,
            self.ttls.workflow_template,
        )
        .await
    }

    pub async fn get_workflow_template(&self, template_id: &str) -> CacheResult<Option<Workflow>> {
        self.get_json(&self.template_key(template_id)).await
    }

    // ========================================================================
    // Batch operations
    // ========================================================================

    /// Write many status records in one atomic round trip.
    pub async fn batch_update_agent_status(
        &self,
        records: &BTreeMap<String, AgentStatusRecord>,
    ) -> CacheResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut pipeline = Pipeline::new().atomic();
        for (agent_id, record) in records {
            pipeline = pipeline.set(
                self.agent_status_key(agent_id),
                serde_json::to_string(record)?,
                Some(self.ttls.agent_status),
            );
        }
        self.store.execute(pipeline).await?;
        debug!(count = records.len(), "Batch-updated agent status records");
        Ok(records.len())
    }

    /// Replace many capability sets in one atomic round trip.
    pub async fn batch_cache_capabilities(
        &self,
        mappings: &BTreeMap<String, Vec<String>>,
    ) -> CacheResult<usize> {
        if mappings.is_empty() {
            return Ok(0);
        }
        let mut pipeline = Pipeline::new().atomic();
        for (capability, agent_ids) in mappings {
            pipeline = pipeline.replace_set(
                self.capability_key(capability),
                agent_ids.clone(),
                self.ttls.capability_mapping,
            );
        }
        self.store.execute(pipeline).await?;
        Ok(mappings.len())
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    pub async fn cache_metrics(&self, component: &str, metrics: &Value) -> CacheResult<()> {
        self.put_json(&self.metrics_key(component), metrics, self.ttls.system_metrics)
            .await
    }

    pub async fn get_metrics(&self, component: &str) -> CacheResult<Option<Value>> {
        self.get_json(&self.metrics_key(component)).await
    }

    pub async fn get_cache_hit_ratio(&self) -> CacheResult<f64> {
        Ok(self.store.stats().await?.hit_ratio())
    }

    /// Count cached agents per status. Every status is present, possibly 0.
    pub async fn get_agent_status_distribution(&self) -> CacheResult<BTreeMap<AgentStatus, usize>> {
        let mut distribution: BTreeMap<AgentStatus, usize> =
            AgentStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let pattern = prefix_pattern(&self.agent_status_key(""));
        for record in self.scan_json::<AgentStatusRecord>(&pattern).await? {
            *distribution.entry(record.status).or_default() += 1;
        }
        Ok(distribution)
    }

    pub async fn get_workflow_metrics(&self) -> CacheResult<CacheMetrics> {
        let pattern = prefix_pattern(&self.workflow_key(""));
        let active_workflows = self
            .scan_json::<WorkflowSnapshot>(&pattern)
            .await?
            .iter()
            .filter(|s| s.status == WorkflowStatus::Running)
            .count();

        Ok(CacheMetrics {
            active_workflows,
            cache_hit_ratio: self.get_cache_hit_ratio().await?,
            agent_status_distribution: self.get_agent_status_distribution().await?,
        })
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    pub async fn clear_agent_cache(&self, agent_id: &str) -> CacheResult<u64> {
        self.store
            .delete(&[
                self.agent_status_key(agent_id),
                self.heartbeat_key(agent_id),
                self.agent_metadata_key(agent_id),
            ])
            .await
    }

    /// Delete a workflow snapshot and every step snapshot under it.
    pub async fn clear_workflow_cache(&self, workflow_id: &str) -> CacheResult<u64> {
        let mut keys = self
            .store
            .keys(&prefix_pattern(&self.step_key(workflow_id, "")))
            .await?;
        keys.push(self.workflow_key(workflow_id));
        self.store.delete(&keys).await
    }

    /// Delete every key under the prefix.
    pub async fn clear_all(&self) -> CacheResult<u64> {
        let keys = self.store.keys(&prefix_pattern(&self.prefix)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete(&keys).await?;
        debug!(deleted, prefix = %self.prefix, "Cleared state cache");
        Ok(deleted)
    }
}

/// Glob matching every key that starts with `prefix` literally.
fn prefix_pattern(prefix: &str) -> String {
    format!("{}*", escape_glob(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::{AgentDescriptor, WorkflowStep};

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn status(status: AgentStatus) -> AgentStatusRecord {
        AgentStatusRecord {
            status,
            last_seen: Utc::now(),
            current_runs: 0,
            max_runs: 10,
        }
    }

    fn two_step_workflow() -> Workflow {
        Workflow::new("wf-1", "pipeline")
            .with_step(WorkflowStep::new("a", "first", "agent-1"))
            .with_step(WorkflowStep::new("b", "second", "agent-1").depends_on("a"))
    }

    #[tokio::test]
    async fn test_agent_records_use_prefixed_keys() {
        let cache = StateCache::in_memory();
        cache
            .cache_agent_status("a-1", &status(AgentStatus::Online))
            .await
            .unwrap();

        let keys = cache.store().keys("*").await.unwrap();
        assert_eq!(keys, vec!["acp:agents:status:a-1"]);
        let ttl = cache.store().ttl(&keys[0]).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(300));

        let record = cache.get_agent_status("a-1").await.unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Online);
        assert!(cache.get_agent_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_and_heartbeat() {
        let cache = StateCache::in_memory();
        let descriptor = AgentDescriptor::new("a-1", "Analyst").with_capability("analysis");
        cache
            .cache_agent_metadata(&AgentMetadataRecord::from(&descriptor))
            .await
            .unwrap();
        let now = Utc::now();
        cache.update_agent_heartbeat("a-1", now).await.unwrap();

        let meta = cache.get_agent_metadata("a-1").await.unwrap().unwrap();
        assert_eq!(meta.capabilities, vec!["analysis"]);
        assert_eq!(cache.get_agent_heartbeat("a-1").await.unwrap(), Some(now));
    }

    #[tokio::test]
    async fn test_capability_mapping_replaces() {
        let cache = StateCache::in_memory();
        cache
            .cache_capability_mapping("analysis", &ids(&["a-1", "a-2"]))
            .await
            .unwrap();
        cache
            .cache_capability_mapping("analysis", &ids(&["a-3"]))
            .await
            .unwrap();

        assert_eq!(
            cache.discover_agents_by_capability("analysis").await.unwrap(),
            ids(&["a-3"])
        );
        assert!(
            cache
                .store()
                .ttl("acp:capabilities:analysis")
                .await
                .unwrap()
                .is_some()
        );

        assert!(cache.remove_agent_from_capability("analysis", "a-3").await.unwrap());
        assert!(cache.discover_agents_by_capability("analysis").await.unwrap().is_empty());
        assert!(!cache.invalidate_capability("analysis").await.unwrap());
    }

    #[tokio::test]
    async fn test_workflow_snapshots_and_progress() {
        let cache = StateCache::in_memory();
        let mut workflow = two_step_workflow();
        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());

        assert!(!cache.update_workflow_progress("wf-1", 50, Some("b"), Some(1)).await.unwrap());

        cache
            .cache_workflow_state("wf-1", &WorkflowSnapshot::started(&workflow))
            .await
            .unwrap();
        assert!(cache.update_workflow_progress("wf-1", 50, Some("b"), Some(1)).await.unwrap());

        let snapshot = cache.get_workflow_state("wf-1").await.unwrap().unwrap();
        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.current_step.as_deref(), Some("b"));
        assert_eq!(snapshot.completed_steps, 1);
        assert_eq!(snapshot.total_steps, 2);
    }

    #[tokio::test]
    async fn test_step_snapshot_and_clear_workflow() {
        let cache = StateCache::in_memory();
        let mut step = WorkflowStep::new("a", "first", "agent-1");
        step.start().unwrap();
        step.complete(json!({"ok": true}).as_object().cloned().unwrap_or_default())
            .unwrap();

        cache.update_workflow_step("wf-1", "a", &StepSnapshot::of(&step)).await.unwrap();
        cache.update_workflow_step("wf-10", "a", &StepSnapshot::of(&step)).await.unwrap();
        cache
            .cache_workflow_state("wf-1", &WorkflowSnapshot::of(&two_step_workflow()))
            .await
            .unwrap();

        let stored = cache.get_workflow_step("wf-1", "a").await.unwrap().unwrap();
        assert_eq!(stored.agent_id, "agent-1");
        assert_eq!(stored.result.unwrap()["ok"], json!(true));

        assert_eq!(cache.clear_workflow_cache("wf-1").await.unwrap(), 2);
        assert!(cache.get_workflow_step("wf-10", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_workflow_treats_id_literally() {
        let cache = StateCache::in_memory();
        let mut step = WorkflowStep::new("a", "first", "agent-1");
        step.start().unwrap();
        let snapshot = StepSnapshot::of(&step);

        for workflow_id in ["wf*", "wf1", "wf?", "wf[1]"] {
            cache.update_workflow_step(workflow_id, "a", &snapshot).await.unwrap();
        }

        assert_eq!(cache.clear_workflow_cache("wf*").await.unwrap(), 1);
        assert_eq!(cache.clear_workflow_cache("wf?").await.unwrap(), 1);
        assert!(cache.get_workflow_step("wf1", "a").await.unwrap().is_some());
        assert!(cache.get_workflow_step("wf[1]", "a").await.unwrap().is_some());
        assert!(cache.get_workflow_step("wf*", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_capability_mapping_removes_set() {
        let cache = StateCache::in_memory();
        cache
            .cache_capability_mapping("analysis", &ids(&["a-1"]))
            .await
            .unwrap();
        cache.cache_capability_mapping("analysis", &[]).await.unwrap();
        assert!(!cache.store().exists("acp:capabilities:analysis").await.unwrap());

        let mappings: BTreeMap<String, Vec<String>> = [
            ("analysis".to_string(), ids(&["a-2"])),
            ("testing".to_string(), Vec::new()),
        ]
        .into_iter()
        .collect();
        assert_eq!(cache.batch_cache_capabilities(&mappings).await.unwrap(), 2);
        assert_eq!(
            cache.discover_agents_by_capability("analysis").await.unwrap(),
            ids(&["a-2"])
        );
        assert!(!cache.store().exists("acp:capabilities:testing").await.unwrap());
    }

    #[tokio::test]
    async fn test_templates_round_trip() {
        let cache = StateCache::in_memory();
        cache
            .cache_workflow_template("tpl", &two_step_workflow())
            .await
            .unwrap();
        let template = cache.get_workflow_template("tpl").await.unwrap().unwrap();
        assert_eq!(template.steps.len(), 2);
        assert_eq!(template.steps[1].depends_on, vec!["a"]);
    }

    #[tokio::test]
    async fn test_batch_operations_and_distribution() {
        let cache = StateCache::in_memory();
        let records: BTreeMap<String, AgentStatusRecord> = [
            ("a-1".to_string(), status(AgentStatus::Online)),
            ("a-2".to_string(), status(AgentStatus::Online)),
            ("a-3".to_string(), status(AgentStatus::Busy)),
        ]
        .into_iter()
        .collect();
        assert_eq!(cache.batch_update_agent_status(&records).await.unwrap(), 3);

        let mappings: BTreeMap<String, Vec<String>> = [
            ("analysis".to_string(), ids(&["a-1", "a-2"])),
            ("testing".to_string(), ids(&["a-3"])),
        ]
        .into_iter()
        .collect();
        assert_eq!(cache.batch_cache_capabilities(&mappings).await.unwrap(), 2);
        assert_eq!(
            cache.discover_agents_by_capability("testing").await.unwrap(),
            ids(&["a-3"])
        );

        let distribution = cache.get_agent_status_distribution().await.unwrap();
        assert_eq!(distribution[&AgentStatus::Online], 2);
        assert_eq!(distribution[&AgentStatus::Busy], 1);
        assert_eq!(distribution[&AgentStatus::Offline], 0);

        let mut ids = cache.cached_agent_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a-1", "a-2", "a-3"]);
    }

    #[tokio::test]
    async fn test_workflow_metrics_count_running_only() {
        let cache = StateCache::in_memory();
        let mut running = two_step_workflow();
        running.status = WorkflowStatus::Running;
        let mut done = Workflow::new("wf-2", "done").with_step(WorkflowStep::new("a", "a", "x"));
        done.status = WorkflowStatus::Completed;

        cache
            .cache_workflow_state("wf-1", &WorkflowSnapshot::of(&running))
            .await
            .unwrap();
        cache
            .cache_workflow_state("wf-2", &WorkflowSnapshot::of(&done))
            .await
            .unwrap();
        cache.get_workflow_state("wf-1").await.unwrap();
        cache.get_workflow_state("missing").await.unwrap();

        let metrics = cache.get_workflow_metrics().await.unwrap();
        assert_eq!(metrics.active_workflows, 1);
        assert!(metrics.cache_hit_ratio > 0.0);
        assert_eq!(metrics.agent_status_distribution.len(), AgentStatus::ALL.len());
    }

    #[tokio::test]
    async fn test_metrics_and_clear_all() {
        let cache = StateCache::in_memory().with_prefix("test:").unwrap();
        cache
            .cache_metrics("router", &json!({"processed": 4}))
            .await
            .unwrap();
        assert_eq!(
            cache.get_metrics("router").await.unwrap(),
            Some(json!({"processed": 4}))
        );

        cache.store().set("unrelated", "x", None).await.unwrap();
        cache
            .cache_agent_status("a-1", &status(AgentStatus::Online))
            .await
            .unwrap();
        assert_eq!(cache.clear_agent_cache("a-1").await.unwrap(), 1);
        assert_eq!(cache.clear_all().await.unwrap(), 1);
        assert!(cache.store().exists("unrelated").await.unwrap());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(matches!(
            StateCache::in_memory().with_prefix(""),
            Err(CacheError::InvalidConfig(_))
        ));
    }
}
