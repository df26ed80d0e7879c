//! Behaviors: reusable hooks attached to activity nodes
//!
//! A behavior observes the lifecycle of the node it is attached to without
//! the activity having to know about it. Hooks of several behaviors run in
//! attachment order, each to completion before the next.

use async_trait::async_trait;
use tracing::debug;

use super::ActivityError;
use crate::engine::{ActivityExecutionContext, SignalContext};
use crate::workflow::signal::Signal;

/// Property keys written by the built-in behaviors
pub mod properties {
    /// Set on a loop once a `break` signal reached it
    pub const BREAKING: &str = "breaking";

    /// Reason carried by the `cancel` signal that closed a scope
    pub const CANCEL_REASON: &str = "cancel_reason";
}

#[async_trait]
pub trait Behavior: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Runs after the owner's `execute` returned successfully
    async fn on_executed(&self, ctx: &mut ActivityExecutionContext<'_>) -> Result<(), ActivityError> {
        let _ = ctx;
        Ok(())
    }

    /// Observe a signal raised by a descendant of the owner
    fn on_signal(&self, signal: &Signal, ctx: &mut SignalContext<'_>) {
        let _ = (signal, ctx);
    }

    /// Runs when every child of the owner is terminal and the finished child
    /// carried no continuation
    async fn on_children_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<(), ActivityError> {
        let _ = ctx;
        Ok(())
    }
}

/// Marks the owner as breaking when a `break` signal reaches it
///
/// Only the nearest loop reacts: the signal is marked handled, so loops
/// further up ignore it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakBehavior;

#[async_trait]
impl Behavior for BreakBehavior {
    fn name(&self) -> &str {
        "break"
    }

    fn on_signal(&self, signal: &Signal, ctx: &mut SignalContext<'_>) {
        if !signal.is_break() || ctx.is_handled() {
            return;
        }

        debug!(
            node_id = %ctx.node_id(),
            origin = %ctx.origin(),
            "break signal received"
        );
        ctx.set_property(properties::BREAKING, true);
        ctx.mark_handled();
    }
}

/// Completes the owner once all of its children have finished
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinBehavior;

#[async_trait]
impl Behavior for JoinBehavior {
    fn name(&self) -> &str {
        "join"
    }

    async fn on_children_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<(), ActivityError> {
        ctx.complete();
        Ok(())
    }
}

/// Turns the owner into a cancellation scope
///
/// When a `cancel` signal from a descendant reaches the owner, every child
/// of the owner is canceled (bookmarks and queued work included) and the
/// owner completes as if its work had finished. The nearest scope handles
/// the signal; scopes further up ignore it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelBehavior;

#[async_trait]
impl Behavior for CancelBehavior {
    fn name(&self) -> &str {
        "cancel"
    }

    fn on_signal(&self, signal: &Signal, ctx: &mut SignalContext<'_>) {
        if !signal.is_cancel() || ctx.is_handled() {
            return;
        }

        let reason = signal
            .payload
            .get("reason")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(
            node_id = %ctx.node_id(),
            origin = %ctx.origin(),
            %reason,
            "cancel signal received"
        );
        ctx.set_property(properties::CANCEL_REASON, reason);
        ctx.cancel_scope();
        ctx.mark_handled();
    }
}
