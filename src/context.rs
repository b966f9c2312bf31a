//! Orchestration Context
//!
//! One explicitly constructed owner for every runtime component: the state
//! cache, the lifecycle event bus, the agent registry, the message router
//! and the workflow engine. Components share the same cache and bus. There
//! is no process-wide state; an application may run several contexts side
//! by side (for example one per tenant prefix).

use std::sync::Arc;
use tessera_agent::{AgentRegistry, MessageRouter, RegistryTasks};
use tessera_cache::StateCache;
use tessera_core::{EventBus, LifecycleEvent};
use tessera_workflow::WorkflowEngine;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::TesseraResult;

pub struct OrchestrationContext {
    config: OrchestratorConfig,
    cache: StateCache,
    events: EventBus,
    registry: Arc<AgentRegistry>,
    router: Arc<MessageRouter>,
    engine: Arc<WorkflowEngine>,
    tasks: Mutex<Option<RegistryTasks>>,
    #[cfg(feature = "redis")]
    relay: Mutex<Option<tessera_cache::EventRelay>>,
    #[cfg(feature = "redis")]
    redis: Option<Arc<tessera_cache::RedisStore>>,
}

impl OrchestrationContext {
    /// Build a context around an already constructed cache.
    pub fn with_cache(config: OrchestratorConfig, cache: StateCache) -> Self {
        let events = EventBus::default();
        let registry = Arc::new(
            AgentRegistry::new(config.registry.clone())
                .with_cache(cache.clone())
                .with_events(events.clone()),
        );
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            config.router.clone(),
        ));
        let engine = Arc::new(
            WorkflowEngine::new(Arc::clone(&router), config.workflow.clone())
                .with_cache(cache.clone())
                .with_events(events.clone()),
        );

        Self {
            config,
            cache,
            events,
            registry,
            router,
            engine,
            tasks: Mutex::new(None),
            #[cfg(feature = "redis")]
            relay: Mutex::new(None),
            #[cfg(feature = "redis")]
            redis: None,
        }
    }

    /// In-memory context. Ignores `cache.redis_url`.
    pub fn in_memory(config: OrchestratorConfig) -> TesseraResult<Self> {
        let cache = StateCache::in_memory().with_prefix(config.cache.prefix.clone())?;
        Ok(Self::with_cache(config, cache))
    }

    /// Build a context from configuration, connecting to Redis when a URL
    /// is configured and the `redis` feature is enabled.
    pub async fn connect(config: OrchestratorConfig) -> TesseraResult<Self> {
        #[cfg(feature = "redis")]
        {
            if let Some(url) = config.cache.redis_url.clone() {
                let store = Arc::new(
                    tessera_cache::RedisStore::with_config(
                        tessera_cache::RedisConfig::new(url).with_pool_size(config.cache.pool_size),
                    )
                    .await?,
                );
                let cache = StateCache::new(store.clone()).with_prefix(config.cache.prefix.clone())?;
                info!(prefix = %config.cache.prefix, "Orchestration context using Redis state");
                let mut context = Self::with_cache(config, cache);
                context.redis = Some(store);
                return Ok(context);
            }
        }

        #[cfg(not(feature = "redis"))]
        {
            if config.cache.redis_url.is_some() {
                warn!("redis_url is set but the redis feature is disabled; using in-memory state");
            }
        }

        Self::in_memory(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Receive every lifecycle event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Launch the registry's health and discovery loops. Idempotent.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return;
        }
        *tasks = Some(self.registry.start_background_tasks());

        #[cfg(feature = "redis")]
        {
            if let Some(store) = &self.redis {
                *self.relay.lock().await = Some(tessera_cache::EventRelay::start(
                    &self.events,
                    Arc::clone(store),
                    self.cache.prefix(),
                ));
            }
        }

        info!(
            discovery = self.config.registry.discovery_enabled,
            strategy = %self.config.workflow.coordination_strategy,
            "Orchestration context started"
        );
    }

    /// Stop background loops and cancel every active workflow. Returns the
    /// number of workflows cancelled.
    pub async fn shutdown(&self) -> usize {
        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.stop();
        }

        let cancelled = self.engine.cancel_all().await;
        if cancelled > 0 {
            warn!(cancelled, "Cancelled active workflows during shutdown");
        }

        #[cfg(feature = "redis")]
        {
            if let Some(relay) = self.relay.lock().await.take() {
                relay.stop();
            }
        }

        info!("Orchestration context stopped");
        cancelled
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }
}
