//! Integration tests for the Redis backend
//!
//! These tests require a running Redis instance on localhost:6379

#[cfg(feature = "redis")]
mod redis_tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tessera_cache::{
        Pipeline, PipelineReply, RedisStore, StateCache, StateStore,
    };
    use tessera_core::{AgentStatus, AgentStatusRecord};

    async fn setup_cache(test: &str) -> Option<StateCache> {
        let store = match RedisStore::new("redis://localhost:6379").await {
            Ok(store) => store,
            Err(_) => {
                eprintln!("Redis not available, skipping test");
                return None;
            }
        };
        let prefix = format!("tessera-test:{}:{}:", test, std::process::id());
        let cache = StateCache::new(Arc::new(store)).with_prefix(prefix).ok()?;
        cache.clear_all().await.ok()?;
        Some(cache)
    }

    #[tokio::test]
    async fn test_status_roundtrip_with_ttl() {
        let Some(cache) = setup_cache("status").await else {
            return;
        };

        let record = AgentStatusRecord {
            status: AgentStatus::Busy,
            last_seen: chrono::Utc::now(),
            current_runs: 1,
            max_runs: 4,
        };
        cache.cache_agent_status("a-1", &record).await.unwrap();

        let stored = cache.get_agent_status("a-1").await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Busy);
        assert_eq!(cache.cached_agent_ids().await.unwrap(), vec!["a-1"]);

        let key = format!("{}agents:status:a-1", cache.prefix());
        let ttl = cache.store().ttl(&key).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(300));

        assert_eq!(cache.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_atomic_pipeline() {
        let Some(cache) = setup_cache("pipeline").await else {
            return;
        };
        let key = format!("{}capabilities:testing", cache.prefix());

        let replies = cache
            .store()
            .execute(
                Pipeline::new()
                    .atomic()
                    .delete(key.clone())
                    .sadd(key.clone(), vec!["a".to_string(), "b".to_string()])
                    .expire(key.clone(), Duration::from_secs(60))
                    .get(format!("{}missing", cache.prefix())),
            )
            .await
            .unwrap();

        assert_eq!(
            replies,
            vec![
                PipelineReply::Count(0),
                PipelineReply::Count(2),
                PipelineReply::Bool(true),
                PipelineReply::Value(None),
            ]
        );
        assert_eq!(
            cache.discover_agents_by_capability("testing").await.unwrap(),
            vec!["a", "b"]
        );

        cache.clear_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_capabilities() {
        let Some(cache) = setup_cache("batch").await else {
            return;
        };

        let mappings: BTreeMap<String, Vec<String>> = [
            ("analysis".to_string(), vec!["a-1".to_string()]),
            ("testing".to_string(), vec!["a-2".to_string(), "a-3".to_string()]),
        ]
        .into_iter()
        .collect();
        cache.batch_cache_capabilities(&mappings).await.unwrap();

        assert_eq!(
            cache.discover_agents_by_capability("testing").await.unwrap(),
            vec!["a-2", "a-3"]
        );
        assert!(cache.remove_agent_from_capability("analysis", "a-1").await.unwrap());
        assert!(
            cache
                .discover_agents_by_capability("analysis")
                .await
                .unwrap()
                .is_empty()
        );

        cache.clear_all().await.unwrap();
    }
}
