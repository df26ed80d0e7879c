//! Control-flow leaf activities

use async_trait::async_trait;
use tracing::debug;

use crate::activity::{Activity, ActivityError, ActivityNode, ExecutionOutcome};
use crate::engine::ActivityExecutionContext;
use crate::workflow::Signal;

/// Raises a `break` signal for the nearest enclosing loop, then completes
#[derive(Debug, Clone, Copy, Default)]
pub struct Break;

#[async_trait]
impl Activity for Break {
    fn activity_type(&self) -> &str {
        "Break"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        ctx.raise_signal(Signal::break_loop());
        Ok(ExecutionOutcome::Completed)
    }
}

/// Raises a `cancel` signal for the nearest cancellation scope, then
/// completes
///
/// The optional `reason` input travels in the signal payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancel;

impl Cancel {
    pub const REASON: &'static str = "reason";
}

#[async_trait]
impl Activity for Cancel {
    fn activity_type(&self) -> &str {
        "Cancel"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let reason = match ctx.input(Self::REASON)? {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(reason) => reason,
            other => other.to_string(),
        };
        if !ctx.raise_signal(Signal::cancel(reason)) {
            debug!(node_id = %ctx.node().node_id(), "cancel signal reached no scope");
        }
        Ok(ExecutionOutcome::Completed)
    }
}

/// Fails with the message given by its `message` input
#[derive(Debug, Clone, Copy, Default)]
pub struct Fault;

impl Fault {
    pub const MESSAGE: &'static str = "message";
}

#[async_trait]
impl Activity for Fault {
    fn activity_type(&self) -> &str {
        "Fault"
    }

    fn validate(&self, node: &ActivityNode) -> Result<(), String> {
        match node.input(Self::MESSAGE) {
            Some(_) => Ok(()),
            None => Err("missing `message` input".to_string()),
        }
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let message = match ctx.input(Self::MESSAGE)? {
            serde_json::Value::String(message) => message,
            other => other.to_string(),
        };
        Err(ActivityError::new(message).with_type("fault"))
    }
}
