//! # Tessera Agent
//!
//! Agent bookkeeping and message dispatch for the Tessera runtime.
//!
//! - [`AgentExecutor`]: the one operation every agent adapter implements
//! - [`AgentRegistry`]: registration, capability index, health and cache mirroring
//! - [`MessageRouter`]: validation, resolution, least-loaded selection and dispatch
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_agent::{AgentRegistry, FnExecutor, MessageRouter, RegistryConfig, RouterConfig};
//! use tessera_core::{AgentDescriptor, Message, MessageType, Response};
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(AgentRegistry::new(RegistryConfig::default()));
//! registry
//!     .register(
//!         AgentDescriptor::new("tester", "Test Runner").with_capability("testing"),
//!         Arc::new(FnExecutor::new(|m: Message| async move {
//!             Ok(Response::success(&m.message_id, m.content))
//!         })),
//!     )
//!     .await
//!     .unwrap();
//!
//! let router = MessageRouter::new(registry, RouterConfig::default());
//! let response = router.route_message(Message::new(MessageType::RunTests)).await;
//! assert!(response.success);
//! # });
//! ```

pub mod error;
pub mod executor;
pub mod registry;
pub mod router;
pub mod task;

pub use error::{AgentError, AgentResult};
pub use executor::{AgentExecutor, FnExecutor};
pub use registry::{AgentRegistry, RegistryConfig, RegistryMetrics, RegistryTasks};
pub use router::{InFlightDispatch, MessageRouter, RouterConfig, RouterStats};
pub use task::{BackgroundTaskHandle, spawn_periodic};
