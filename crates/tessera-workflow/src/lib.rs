//! # Tessera Workflow
//!
//! Dependency-ordered execution of multi-step workflows.
//!
//! - [`plan`]: definition validation, cycle detection, topological order and
//!   dependency levels
//! - [`WorkflowEngine`]: background execution with bounded step retries,
//!   progress snapshots in the state cache, cancellation and workflow retry
//!
//! ```rust
//! use tessera_core::{Workflow, WorkflowStep};
//! use tessera_workflow::ExecutionPlan;
//!
//! let wf = Workflow::new("release", "Release")
//!     .with_step(WorkflowStep::new("build", "Build", "builder"))
//!     .with_step(WorkflowStep::new("test", "Test", "tester").depends_on("build"))
//!     .with_step(WorkflowStep::new("docs", "Docs", "writer").depends_on("build"));
//!
//! let plan = ExecutionPlan::build(&wf, 100).unwrap();
//! assert_eq!(plan.levels, vec![vec!["build"], vec!["test", "docs"]]);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod plan;

pub use config::{CoordinationStrategy, WorkflowConfig};
pub use engine::{EngineStats, WorkflowEngine, WorkflowStatusView};
pub use error::{WorkflowError, WorkflowResult};
pub use plan::{ExecutionPlan, dependency_levels, find_cycle, topological_order, validate_definition};
