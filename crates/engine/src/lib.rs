//! # Activity-Tree Execution Engine
//!
//! Runs workflows declared as trees of activities, suspending on bookmarks
//! and resuming from persisted state.
//!
//! ## Features
//!
//! - **Explicit work queue**: every step is a persistable work item; a child
//!   reports back to its owner through a named continuation
//! - **Arena-owned instances**: one tree of activity instances per run, linked
//!   by ids and serialized as a plain document
//! - **Signals and behaviors**: children raise signals to their ancestors;
//!   behaviors like break, join and cancel attach to any activity
//! - **Commit strategies**: nodes can ask for the run to be persisted around
//!   their execution, not only when the run loop halts
//! - **Bookmarks**: activities suspend on hashed payloads that external
//!   events trigger later
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRuntime                         │
//! │  (registry lookup, per-instance lease, load and save)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                          │
//! │  (pipeline middleware, run loop, notifications)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  WorkflowStateStore                          │
//! │  (PostgreSQL: arbor_workflow_states, arbor_workflow_bookmarks)│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use arbor_engine::prelude::*;
//! use arbor_engine::activities::{Sequence, SetVariable};
//! use arbor_engine::workflow::Input;
//!
//! # tokio_test::block_on(async {
//! let root = NodeBuilder::new("root", Sequence).with_child(
//!     Sequence::PORT,
//!     NodeBuilder::new("greet", SetVariable::new("greeting"))
//!         .with_input(SetVariable::VALUE, Input::literal(serde_json::json!("hello"))),
//! );
//! let workflow = Workflow::new("hello", 1, root)
//!     .unwrap()
//!     .with_result_variable("greeting");
//!
//! let result = WorkflowRunner::new()
//!     .run_new(std::sync::Arc::new(workflow), RunOptions::new())
//!     .await
//!     .unwrap();
//!
//! assert_eq!(result.status(), WorkflowStatus::Finished);
//! assert_eq!(result.output, Some(serde_json::json!("hello")));
//! # });
//! ```

pub mod activities;
pub mod activity;
pub mod config;
pub mod engine;
pub mod persistence;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::activity::{
        Activity, ActivityError, ActivityNode, Behavior, ChildCompletion, ExecutionOutcome,
        NodeBuilder,
    };
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        ActivityExecutionContext, CommitStrategy, ResumeFrom, RunOptions, RunResult,
        RunnerError, ScheduleOptions, SignalContext, WorkflowRegistry, WorkflowRunner,
        WorkflowRuntime,
    };
    pub use crate::persistence::{
        InMemoryWorkflowStateStore, PostgresWorkflowStateStore, StoreError, WorkflowStateStore,
    };
    pub use crate::workflow::{
        Bookmark, Signal, Workflow, WorkflowError, WorkflowState, WorkflowStatus,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityError, ExecutionOutcome, NodeBuilder};
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    CommitStrategy, ResumeFrom, RunOptions, RunResult, RunnerError, RuntimeError,
    WorkflowRegistry, WorkflowRunner, WorkflowRuntime,
};
pub use persistence::{
    InMemoryWorkflowStateStore, PostgresWorkflowStateStore, StoreError, WorkflowStateStore,
};
pub use workflow::{Bookmark, Workflow, WorkflowError, WorkflowState, WorkflowStatus};
