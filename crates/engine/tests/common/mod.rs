//! Activities and helpers shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use parking_lot::Mutex;

use arbor_engine::engine::{CommitStateHandler, SignalContext};
use arbor_engine::prelude::*;
use arbor_engine::workflow::{Input, PropertyValue, WorkflowState};

/// Variable the recording activities append to
pub const TRACE: &str = "trace";

/// Appends its label (or its `value` input, when bound) to the `trace` variable
pub struct Record {
    label: &'static str,
}

impl Record {
    pub const VALUE: &'static str = "value";

    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

#[async_trait]
impl Activity for Record {
    fn activity_type(&self) -> &str {
        "Record"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let entry = match ctx.input(Self::VALUE)? {
            Value::Null => json!(self.label),
            value => value,
        };
        let mut trace = match ctx.variable(TRACE) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        trace.push(entry);
        ctx.set_variable(TRACE, Value::Array(trace));
        Ok(ExecutionOutcome::Completed)
    }
}

/// Raises `break` when the `item` variable equals `at`
pub struct BreakWhen {
    pub at: Value,
}

#[async_trait]
impl Activity for BreakWhen {
    fn activity_type(&self) -> &str {
        "BreakWhen"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        if ctx.variable("item") == Some(&self.at) {
            ctx.raise_signal(Signal::break_loop());
        }
        Ok(ExecutionOutcome::Completed)
    }
}

/// Runs its `body` child and absorbs a fault raised inside it
pub struct Guard;

impl Guard {
    pub const BODY: &'static str = "body";
}

#[async_trait]
impl Activity for Guard {
    fn activity_type(&self) -> &str {
        "Guard"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let ids = ctx.schedule_port(Self::BODY, ScheduleOptions::new().with_callback("guarded"))?;
        if ids.is_empty() {
            return Ok(ExecutionOutcome::Completed);
        }
        Ok(ExecutionOutcome::Running)
    }

    async fn on_child_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
        child: &ChildCompletion,
    ) -> Result<(), ActivityError> {
        let faulted = child.status == arbor_engine::workflow::ActivityStatus::Faulted;
        ctx.set_variable("caught", json!(faulted));
        ctx.complete();
        Ok(())
    }

    fn on_signal(&self, signal: &Signal, ctx: &mut SignalContext<'_>) {
        if signal.is_fault() && !ctx.is_handled() {
            let origin = ctx.origin_node_id().to_string();
            ctx.set_property("caught_from", origin);
            ctx.mark_handled();
        }
    }
}

/// Claims to suspend without creating a bookmark
pub struct Stuck;

#[async_trait]
impl Activity for Stuck {
    fn activity_type(&self) -> &str {
        "Stuck"
    }

    async fn execute(
        &self,
        _ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        Ok(ExecutionOutcome::Suspended)
    }
}

/// Never executes
pub struct Disabled;

#[async_trait]
impl Activity for Disabled {
    fn activity_type(&self) -> &str {
        "Disabled"
    }

    async fn can_execute(&self, _ctx: &ActivityExecutionContext<'_>) -> bool {
        false
    }

    async fn execute(
        &self,
        _ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        Err(ActivityError::new("disabled activity executed"))
    }
}

/// Schedules its children without a continuation and without a join
pub struct Detach;

#[async_trait]
impl Activity for Detach {
    fn activity_type(&self) -> &str {
        "Detach"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        ctx.schedule_port("children", ScheduleOptions::new())?;
        Ok(ExecutionOutcome::Running)
    }
}

/// Schedules its first child without a continuation, then its second child
/// with one, and completes when the second reports back
pub struct FireThenAwait;

impl FireThenAwait {
    pub const CHILDREN: &'static str = "children";
}

#[async_trait]
impl Activity for FireThenAwait {
    fn activity_type(&self) -> &str {
        "FireThenAwait"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let children = ctx.port(Self::CHILDREN).to_vec();
        let [fired, awaited] = children.as_slice() else {
            return Err(ActivityError::new("expected exactly two children"));
        };
        ctx.schedule_activity(fired, ScheduleOptions::new())?;
        ctx.schedule_activity(awaited, ScheduleOptions::new().with_callback("awaited"))?;
        Ok(ExecutionOutcome::Running)
    }

    async fn on_child_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
        child: &ChildCompletion,
    ) -> Result<(), ActivityError> {
        if child.callback == "awaited" {
            ctx.complete();
        }
        Ok(())
    }
}

/// Cancels the given token when it executes
pub struct CancelRun {
    pub token: CancellationToken,
}

#[async_trait]
impl Activity for CancelRun {
    fn activity_type(&self) -> &str {
        "CancelRun"
    }

    async fn execute(
        &self,
        _ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        self.token.cancel();
        Ok(ExecutionOutcome::Completed)
    }
}

/// Keeps every committed snapshot in memory
#[derive(Default)]
pub struct RecordingCommits {
    snapshots: Mutex<Vec<WorkflowState>>,
}

impl RecordingCommits {
    pub fn snapshots(&self) -> Vec<WorkflowState> {
        self.snapshots.lock().clone()
    }
}

#[async_trait]
impl CommitStateHandler for RecordingCommits {
    async fn commit(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.snapshots.lock().push(state.clone());
        Ok(())
    }
}

/// Rejects every commit
pub struct FailingCommits;

#[async_trait]
impl CommitStateHandler for FailingCommits {
    async fn commit(&self, _state: &WorkflowState) -> Result<(), StoreError> {
        Err(StoreError::Database("connection refused".to_string()))
    }
}

pub fn record(id: &str, label: &'static str) -> NodeBuilder {
    NodeBuilder::new(id, Record::new(label))
}

pub fn literal(value: Value) -> Input {
    Input::literal(value)
}

pub fn workflow(definition_id: &str, root: NodeBuilder) -> Arc<Workflow> {
    Arc::new(Workflow::new(definition_id, 1, root).expect("valid definition"))
}

/// The `trace` variable of a state, as a list
pub fn trace(state: &WorkflowState) -> Vec<Value> {
    match state.memory.get(TRACE) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

pub fn property<'a>(
    state: &'a WorkflowState,
    node_id: &'a str,
    key: &str,
) -> Vec<&'a PropertyValue> {
    state
        .instances_of(node_id)
        .filter_map(|instance| instance.properties.get(key))
        .collect()
}
