//! Redis-backed [`StateStore`].

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::pipeline::{Pipeline, PipelineOp, PipelineReply};
use crate::store::{StateStore, StoreStats};

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of pooled connections
    pub pool_size: usize,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }
}

/// Pooled Redis store.
pub struct RedisStore {
    pool: deadpool_redis::Pool,
    config: RedisConfig,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("pool_size", &self.config.pool_size)
            .finish()
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl RedisStore {
    pub async fn new(url: impl Into<String>) -> CacheResult<Self> {
        Self::with_config(RedisConfig::new(url)).await
    }

    pub async fn with_config(config: RedisConfig) -> CacheResult<Self> {
        if config.pool_size == 0 {
            return Err(CacheError::InvalidConfig(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        redis_config.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool, config };

        // Fail fast on an unreachable server
        let connect_timeout = Duration::from_secs(store.config.connect_timeout_secs);
        tokio::time::timeout(connect_timeout, store.ping())
            .await
            .map_err(|_| {
                CacheError::ConnectionFailed(format!(
                    "PING timed out after {}s",
                    store.config.connect_timeout_secs
                ))
            })??;

        debug!(url = %store.config.url, "Redis state store connected");
        Ok(store)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn get_connection(&self) -> CacheResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))
    }

    /// PUBLISH a payload, returning the number of subscribers that received it.
    pub async fn publish(&self, channel: &str, payload: &str) -> CacheResult<u64> {
        let mut conn = self.get_connection().await?;
        Ok(conn.publish::<_, _, u64>(channel, payload).await?)
    }

    /// Parse `keyspace_hits`/`keyspace_misses` out of an `INFO stats` reply.
    fn parse_info_stats(info: &str) -> StoreStats {
        let mut stats = StoreStats::default();
        for line in info.lines() {
            let Some((name, value)) = line.trim().split_once(':') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u64>() else {
                continue;
            };
            match name {
                "keyspace_hits" => stats.hits = value,
                "keyspace_misses" => stats.misses = value,
                _ => {}
            }
        }
        stats
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        match ttl {
            Some(ttl) => conn.pset_ex::<_, _, ()>(key, value, millis(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        Ok(conn.del::<_, u64>(keys).await?)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.get_connection().await?;
        let remaining: i64 = conn.pttl(key).await?;
        // -2 missing, -1 no expiry
        Ok((remaining >= 0).then(|| Duration::from_millis(remaining as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        Ok(conn.pexpire::<_, bool>(key, millis(ttl) as i64).await?)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        keys.sort();
        Ok(keys)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        Ok(conn.sadd::<_, _, u64>(key, members).await?)
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        Ok(conn.srem::<_, _, u64>(key, members).await?)
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut members: Vec<String> = conn.smembers(key).await?;
        members.sort();
        Ok(members)
    }

    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<PipelineReply>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        if pipeline.is_atomic() {
            pipe.atomic();
        }
        for op in pipeline.ops() {
            match op {
                PipelineOp::Set { key, value, ttl } => {
                    let cmd = pipe.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        cmd.arg("PX").arg(millis(*ttl));
                    }
                }
                PipelineOp::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                PipelineOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                PipelineOp::SAdd { key, members } => {
                    pipe.cmd("SADD").arg(key).arg(members);
                }
                PipelineOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl));
                }
            }
        }

        let mut conn = self.get_connection().await?;
        let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        if values.len() != pipeline.len() {
            return Err(CacheError::Backend(format!(
                "pipeline returned {} replies for {} commands",
                values.len(),
                pipeline.len()
            )));
        }

        pipeline
            .ops()
            .iter()
            .zip(values.iter())
            .map(|(op, value)| -> CacheResult<PipelineReply> {
                Ok(match op {
                    PipelineOp::Set { .. } => PipelineReply::Ok,
                    PipelineOp::Get { .. } => {
                        PipelineReply::Value(redis::from_redis_value::<Option<String>>(value)?)
                    }
                    PipelineOp::Delete { .. } | PipelineOp::SAdd { .. } => {
                        PipelineReply::Count(redis::from_redis_value::<u64>(value)?)
                    }
                    PipelineOp::Expire { .. } => {
                        PipelineReply::Bool(redis::from_redis_value::<bool>(value)?)
                    }
                })
            })
            .collect()
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        let mut conn = self.get_connection().await?;
        let info: String = redis::cmd("INFO").arg("stats").query_async(&mut conn).await?;
        Ok(Self::parse_info_stats(&info))
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("PING failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_stats() {
        let info = "# Stats\r\ntotal_connections_received:4\r\nkeyspace_hits:12\r\nkeyspace_misses:3\r\n";
        let stats = RedisStore::parse_info_stats(info);
        assert_eq!(stats, StoreStats { hits: 12, misses: 3 });
    }

    #[test]
    fn test_config_builder() {
        let config = RedisConfig::new("redis://cache:6379")
            .with_pool_size(4)
            .with_connect_timeout(2);
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.connect_timeout_secs, 2);
    }

    #[test]
    fn test_millis_rounds_up_to_one() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }
}
