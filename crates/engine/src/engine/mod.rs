//! Workflow execution engine
//!
//! The engine turns a [`Workflow`](crate::workflow::Workflow) definition into
//! a running instance: the [`WorkflowRunner`] builds or rehydrates a
//! [`WorkflowExecutionContext`], seeds its work queue and drives the run loop
//! through the [`ExecutionPipeline`]. The [`WorkflowRuntime`] adds a
//! definition registry and a state store on top.

mod activity_context;
mod commit;
mod context;
mod executor;
mod notifications;
mod pipeline;
mod registry;
mod runner;
mod runtime;
pub mod scheduler;

pub use activity_context::{ActivityExecutionContext, ScheduleOptions, SignalContext};
pub use commit::{CommitStateHandler, CommitStrategy, StoreCommitHandler};
pub use context::WorkflowExecutionContext;
pub use executor::run_workflow;
pub use notifications::{
    BroadcastPublisher, NoopPublisher, NotificationPublisher, WorkflowNotification,
};
pub use pipeline::{ExecutionPipeline, Next, PipelineError, PipelineMiddleware, TracingMiddleware};
pub use registry::{RegistryError, WorkflowRegistry};
pub use runner::{ResumeFrom, RunOptions, RunResult, RunnerError, WorkflowRunner};
pub use runtime::{RuntimeError, WorkflowRuntime};
pub use scheduler::{Continuation, WorkItem, WorkQueue};
