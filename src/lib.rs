//! # Tessera
//!
//! Agent orchestration runtime. Agents advertise capabilities and register
//! an executor; typed messages are routed to the least-loaded capable agent;
//! multi-step workflows run in dependency order with bounded retries; shared
//! state lives in a prefixed, expiring cache that other processes can read.
//!
//! This crate ties the component crates together:
//!
//! - [`OrchestrationContext`]: owns one registry, router, engine, cache and event bus
//! - [`OrchestratorConfig`]: layered defaults and `TESSERA_*` environment settings
//! - [`init_tracing`]: subscriber setup driven by [`TelemetryConfig`]
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera::{OrchestrationContext, OrchestratorConfig};
//! use tessera::agent::FnExecutor;
//! use tessera::model::{AgentDescriptor, Message, MessageType, Response};
//!
//! # tokio_test::block_on(async {
//! let context = OrchestrationContext::in_memory(OrchestratorConfig::default()).unwrap();
//! context
//!     .registry()
//!     .register(
//!         AgentDescriptor::new("coder-1", "Coder").with_capability("code_generation"),
//!         Arc::new(FnExecutor::new(|m: Message| async move {
//!             Ok(Response::success(&m.message_id, m.content))
//!         })),
//!     )
//!     .await
//!     .unwrap();
//!
//! let response = context
//!     .router()
//!     .route_message(Message::new(MessageType::GenerateCode))
//!     .await;
//! assert!(response.success);
//! # });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod telemetry;

pub use config::{
    CacheSettings, ConfigError, LogFormat, OrchestratorConfig, OrchestratorConfigBuilder,
    TelemetryConfig,
};
pub use context::OrchestrationContext;
pub use error::{TesseraError, TesseraResult};
pub use telemetry::init_tracing;

pub use tessera_agent as agent;
pub use tessera_cache as cache;
pub use tessera_core as model;
pub use tessera_workflow as workflow;
