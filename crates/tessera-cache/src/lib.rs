//! # Tessera Cache
//!
//! Shared state for the Tessera runtime. A [`StateStore`] supplies the
//! key/value primitives; [`StateCache`] layers typed, prefixed, expiring
//! records for agents, capabilities and workflows on top of it.
//!
//! ## Backends
//!
//! - [`InMemoryStore`]: single-process, always available
//! - `RedisStore`: pooled Redis connection (requires the `redis` feature)
//!
//! ```rust
//! use tessera_cache::StateCache;
//!
//! # tokio_test::block_on(async {
//! let cache = StateCache::in_memory();
//! cache
//!     .cache_capability_mapping("analysis", &["biz-1".to_string()])
//!     .await?;
//! let agents = cache.discover_agents_by_capability("analysis").await?;
//! assert_eq!(agents, vec!["biz-1"]);
//! # Ok::<(), tessera_cache::CacheError>(())
//! # }).unwrap();
//! ```

pub mod error;
pub mod memory;
pub mod pipeline;
pub mod state;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "redis")]
pub mod relay;

pub use error::{CacheError, CacheResult};
pub use memory::InMemoryStore;
pub use pipeline::{Pipeline, PipelineOp, PipelineReply};
pub use state::{CacheMetrics, CacheTtls, DEFAULT_PREFIX, StateCache};
pub use store::{StateStore, StoreStats};

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStore};
#[cfg(feature = "redis")]
pub use relay::{EventRelay, relay_channels};
