//! Activity trait definition

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ActivityNode, Behavior};
use crate::engine::{ActivityExecutionContext, SignalContext};
use crate::workflow::expression::ExpressionError;
use crate::workflow::signal::Signal;
use crate::workflow::state::{ActivityStatus, InstanceId};

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<ExpressionError> for ActivityError {
    fn from(err: ExpressionError) -> Self {
        Self::new(err.to_string()).with_type("expression")
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_type("serialization")
    }
}

/// What an activity reports after `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Done; the engine completes the instance
    Completed,

    /// Waiting on a bookmark it created during this execution
    Suspended,

    /// Still active: it scheduled children, requested its own completion,
    /// or is otherwise waiting on work it started
    Running,
}

/// A finished child reported to the owner of its continuation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCompletion {
    pub child: InstanceId,
    pub node_id: String,
    /// Callback tag given when the child was scheduled
    pub callback: String,
    /// `Completed`, or `Faulted` when an ancestor handled the child's fault
    pub status: ActivityStatus,
}

/// Behavior shared by every node of one activity type
///
/// Implementations are stateless: per-occurrence state lives in the
/// instance's properties, reached through the execution context.
///
/// # Example
///
/// ```
/// use arbor_engine::prelude::*;
///
/// struct Greet;
///
/// #[async_trait]
/// impl Activity for Greet {
///     fn activity_type(&self) -> &str {
///         "Greet"
///     }
///
///     async fn execute(
///         &self,
///         ctx: &mut ActivityExecutionContext<'_>,
///     ) -> Result<ExecutionOutcome, ActivityError> {
///         ctx.set_variable("greeting", serde_json::json!("hello"));
///         Ok(ExecutionOutcome::Completed)
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Type identifier recorded on every instance and bookmark
    fn activity_type(&self) -> &str;

    fn version(&self) -> i32 {
        1
    }

    /// Behaviors attached ahead of any added on the node builder
    fn default_behaviors(&self) -> Vec<Arc<dyn Behavior>> {
        Vec::new()
    }

    /// Reject a node whose configuration this activity cannot run
    fn validate(&self, node: &ActivityNode) -> Result<(), String> {
        let _ = node;
        Ok(())
    }

    /// When false the instance completes without executing
    async fn can_execute(&self, ctx: &ActivityExecutionContext<'_>) -> bool {
        let _ = ctx;
        true
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError>;

    /// Continuation dispatch for children scheduled with a callback
    async fn on_child_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
        child: &ChildCompletion,
    ) -> Result<(), ActivityError> {
        let _ = (ctx, child);
        Ok(())
    }

    /// Observe a signal raised by a descendant
    fn on_signal(&self, signal: &Signal, ctx: &mut SignalContext<'_>) {
        let _ = (signal, ctx);
    }
}
