//! # Tessera Core
//!
//! Shared vocabulary for the Tessera orchestration runtime: agent descriptors,
//! messages and responses, workflow definitions, the error-code taxonomy used
//! in every structured failure, typed views over the free-form payload bags,
//! and the lifecycle event bus that external audit/metrics sinks subscribe to.
//!
//! Nothing in this crate performs I/O. The registry, router, cache and
//! workflow engine crates build on these types.
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{Message, MessageType, Resolution};
//!
//! let direct = Message::new(MessageType::Request).to_agent("biz-1");
//! assert!(matches!(direct.resolution(), Resolution::Direct("biz-1")));
//!
//! let by_capability = Message::new(MessageType::GenerateCode);
//! assert!(matches!(
//!     by_capability.resolution(),
//!     Resolution::ByCapability(MessageType::GenerateCode)
//! ));
//! ```

pub mod agent;
pub mod error;
pub mod events;
pub mod message;
pub mod records;
pub mod types;
pub mod workflow;

pub use agent::AgentDescriptor;
pub use error::ErrorCode;
pub use events::{EventBus, EventChannel, EventType, LifecycleEvent};
pub use message::{Message, Payload, Resolution, Response};
pub use records::{
    AgentMetadataRecord, AgentStatusRecord, StepRequest, StepSnapshot, WorkflowSnapshot,
};
pub use types::{AgentStatus, MessageType, Priority, StepStatus, WorkflowStatus};
pub use workflow::{TransitionError, Workflow, WorkflowStep};
