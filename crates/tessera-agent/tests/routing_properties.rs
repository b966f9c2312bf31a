//! Registration, discovery and routing properties across the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tessera_agent::{
    AgentError, AgentExecutor, AgentRegistry, FnExecutor, MessageRouter, RegistryConfig,
    RouterConfig,
};
use tessera_cache::StateCache;
use tessera_core::{
    AgentDescriptor, ErrorCode, EventType, Message, MessageType, Response,
};

fn counting_echo(counter: Arc<AtomicU32>) -> Arc<dyn AgentExecutor> {
    Arc::new(FnExecutor::new(move |message: Message| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::success(&message.message_id, message.content))
        }
    }))
}

#[tokio::test]
async fn discover_includes_agent_until_unregistered() {
    let registry = AgentRegistry::new(RegistryConfig::default()).with_cache(StateCache::in_memory());
    let counter = Arc::new(AtomicU32::new(0));

    for id in ["qa-1", "qa-2", "qa-3"] {
        registry
            .register(
                AgentDescriptor::new(id, id).with_capability("testing"),
                counting_echo(Arc::clone(&counter)),
            )
            .await
            .unwrap();
    }

    let ids: Vec<_> = registry
        .discover("testing")
        .await
        .into_iter()
        .map(|a| a.agent_id)
        .collect();
    assert_eq!(ids, vec!["qa-1", "qa-2", "qa-3"]);

    registry.unregister("qa-2").await.unwrap();
    let ids: Vec<_> = registry
        .discover("testing")
        .await
        .into_iter()
        .map(|a| a.agent_id)
        .collect();
    assert_eq!(ids, vec!["qa-1", "qa-3"]);

    assert!(matches!(
        registry.unregister("qa-2").await,
        Err(AgentError::AgentNotFound(_))
    ));
}

#[tokio::test]
async fn scenario_route_by_capability_without_target() {
    let registry = Arc::new(AgentRegistry::new(RegistryConfig::default()));
    let counter = Arc::new(AtomicU32::new(0));
    registry
        .register(
            AgentDescriptor::new("biz-1", "Business Analyst").with_capability("analysis"),
            counting_echo(Arc::clone(&counter)),
        )
        .await
        .unwrap();

    let router = MessageRouter::new(
        Arc::clone(&registry),
        RouterConfig::default().with_capability_mapping(MessageType::AnalyzeRequirements, "analysis"),
    );

    let response = router
        .route_message(Message::new(MessageType::AnalyzeRequirements))
        .await;

    assert!(response.success);
    assert_eq!(response.metadata["agent_id"], "biz-1");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_target_always_yields_agent_not_found() {
    let registry = Arc::new(AgentRegistry::new(RegistryConfig::default()));
    let router = MessageRouter::new(registry, RouterConfig::default());

    for message_type in [MessageType::Ping, MessageType::RunTests, MessageType::DeployApplication] {
        let response = router
            .route_message(Message::new(message_type).to_agent("nobody"))
            .await;
        assert_eq!(response.code(), Some(ErrorCode::AgentNotFound));
    }
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let registry = AgentRegistry::new(RegistryConfig::default());
    let mut events = registry.events().subscribe();

    registry
        .register(
            AgentDescriptor::new("a-1", "A"),
            counting_echo(Arc::new(AtomicU32::new(0))),
        )
        .await
        .unwrap();
    registry.unregister("a-1").await.unwrap();

    let registered = events.recv().await.unwrap();
    assert_eq!(registered.event_type, EventType::AgentRegistered);
    assert_eq!(registered.source, "a-1");
    let unregistered = events.recv().await.unwrap();
    assert_eq!(unregistered.event_type, EventType::AgentUnregistered);
}
