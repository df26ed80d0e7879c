//! The run loop: drains the work queue of one workflow execution context
//!
//! Each work item executes one activity instance. Completions requested
//! while an item executes are drained before the next item is popped, so a
//! finished child is reported to its owner before any sibling runs.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::activity_context::ActivityExecutionContext;
use super::commit::CommitStrategy;
use super::context::{Transition, WorkflowExecutionContext};
use super::scheduler::WorkItem;
use crate::activity::{ActivityError, ActivityNode, ChildCompletion, ExecutionOutcome};
use crate::workflow::{
    ActivityStatus, ExecutionEvent, FaultKind, InstanceId, WorkflowFault, WorkflowSubStatus,
};

/// Drive the context until its queue is empty, it faults, it is canceled or
/// the tick budget runs out; then settle the final status
pub async fn run_workflow(context: &mut WorkflowExecutionContext) {
    context.transition_to(WorkflowSubStatus::Executing);

    let max_ticks = context.config().max_ticks_per_run;
    let mut ticks = 0usize;

    loop {
        if context.is_cancellation_requested() {
            info!(
                instance_id = %context.id(),
                pending = context.pending_work(),
                "cancellation requested, stopping run loop"
            );
            context.mark_canceled();
            break;
        }

        let Some(item) = context.work_queue.pop() else {
            break;
        };

        if max_ticks > 0 && ticks >= max_ticks {
            context.work_queue.push_front(item);
            context.set_fault(WorkflowFault::new(
                FaultKind::TickBudgetExceeded,
                format!("run exceeded {max_ticks} work items"),
            ));
            break;
        }
        ticks += 1;

        execute_work_item(context, item).await;

        if context.has_fault() {
            break;
        }
    }

    context.finalize();
    debug!(
        instance_id = %context.id(),
        status = %context.status(),
        ticks,
        "run loop halted"
    );
}

async fn execute_work_item(context: &mut WorkflowExecutionContext, item: WorkItem) {
    let target = item.target;
    let Some(instance) = context.instance_mut(target) else {
        warn!(activity_instance = %target, "work item targets unknown instance");
        return;
    };
    if instance.status.is_terminal() {
        debug!(activity_instance = %target, status = %instance.status, "skipping finished instance");
        return;
    }
    if let Some(continuation) = item.continuation {
        instance.continuation = Some(continuation);
    }

    let Some(node) = context.node_for(target) else {
        warn!(activity_instance = %target, "instance node missing from definition");
        return;
    };

    let can_execute = {
        let ctx = ActivityExecutionContext::new(context, target, Arc::clone(&node));
        node.activity().can_execute(&ctx).await
    };

    if !can_execute {
        debug!(node_id = %node.node_id(), "activity cannot execute, skipping");
        context.log(target, ExecutionEvent::Skipped);
        context.request_completion(target);
        drain_transitions(context).await;
        return;
    }

    if let Some(instance) = context.instance_mut(target) {
        instance.status = ActivityStatus::Running;
    }
    context.log(target, ExecutionEvent::Started);
    debug!(
        instance_id = %context.id(),
        node_id = %node.node_id(),
        activity_type = %node.activity_type(),
        "executing activity"
    );

    let strategy = context.workflow().commit_strategy_for(&node);
    if strategy.is_some_and(CommitStrategy::commits_before) {
        commit(context, target, &node, CommitStrategy::Executing).await;
        if context.has_fault() {
            return;
        }
    }

    let result = {
        let mut ctx = ActivityExecutionContext::new(context, target, Arc::clone(&node));
        execute_with_behaviors(&node, &mut ctx).await
    };
    context.clear_resumed_bookmark(target);

    match result {
        Ok(outcome) => apply_outcome(context, target, outcome),
        Err(error) => context.fault_instance(target, FaultKind::Execution, error.to_string()),
    }

    if !context.has_fault() {
        drain_transitions(context).await;
    }

    if !context.has_fault() && strategy.is_some_and(CommitStrategy::commits_after) {
        commit(context, target, &node, CommitStrategy::Executed).await;
    }
}

/// Hand a snapshot of the run to the commit handler, faulting the run when
/// the commit fails
async fn commit(
    context: &mut WorkflowExecutionContext,
    target: InstanceId,
    node: &ActivityNode,
    point: CommitStrategy,
) {
    let Some(handler) = context.commit_handler() else {
        return;
    };

    let state = context.to_state();
    match handler.commit(&state).await {
        Ok(()) => debug!(
            instance_id = %context.id(),
            node_id = %node.node_id(),
            %point,
            "workflow state committed"
        ),
        Err(error) => {
            warn!(
                instance_id = %context.id(),
                node_id = %node.node_id(),
                %point,
                error = %error,
                "commit failed"
            );
            context.set_fault(
                WorkflowFault::new(FaultKind::Commit, format!("commit failed: {error}"))
                    .at(target, node.node_id()),
            );
        }
    }
}

async fn execute_with_behaviors(
    node: &ActivityNode,
    ctx: &mut ActivityExecutionContext<'_>,
) -> Result<ExecutionOutcome, ActivityError> {
    let outcome = node.activity().execute(ctx).await?;
    for behavior in node.behaviors() {
        behavior.on_executed(ctx).await?;
    }
    Ok(outcome)
}

fn apply_outcome(context: &mut WorkflowExecutionContext, target: InstanceId, outcome: ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Completed => context.request_completion(target),
        ExecutionOutcome::Suspended => {
            if context.has_bookmarks(target) {
                context.log(target, ExecutionEvent::Suspended);
            } else {
                context.fault_instance(
                    target,
                    FaultKind::SuspensionWithoutBookmark,
                    "activity suspended without creating a bookmark".to_string(),
                );
            }
        }
        ExecutionOutcome::Running => {
            if !context.has_pending_work(target) {
                context.fault_instance(
                    target,
                    FaultKind::SuspensionWithoutBookmark,
                    "activity reported running without scheduling work or creating a bookmark"
                        .to_string(),
                );
            }
        }
    }
}

/// Complete and report finished instances until none are pending
async fn drain_transitions(context: &mut WorkflowExecutionContext) {
    while !context.has_fault() {
        let Some(transition) = context.pop_transition() else {
            break;
        };
        let finished = match transition {
            Transition::Complete(id) => {
                if !context.complete_now(id) {
                    continue;
                }
                id
            }
            Transition::Faulted(id) => id,
        };
        notify_finished(context, finished).await;
    }
}

/// Report a finished instance to its continuation owner, or to its parent's
/// behaviors once all of the parent's children are terminal
async fn notify_finished(context: &mut WorkflowExecutionContext, child: InstanceId) {
    let Some(instance) = context.instance(child) else {
        return;
    };
    let status = instance.status;
    let node_id = instance.node_id.clone();
    let continuation = instance.continuation.clone();
    let parent = instance.parent;

    if let Some(continuation) = continuation {
        let owner = continuation.owner;
        if !context.is_active(owner) {
            debug!(%node_id, owner = %owner, "continuation owner already finished");
            return;
        }
        let Some(owner_node) = context.node_for(owner) else {
            return;
        };

        let completion = ChildCompletion {
            child,
            node_id,
            callback: continuation.callback,
            status,
        };
        let result = {
            let mut ctx = ActivityExecutionContext::new(context, owner, Arc::clone(&owner_node));
            owner_node
                .activity()
                .on_child_completed(&mut ctx, &completion)
                .await
        };
        if let Err(error) = result {
            context.fault_instance(owner, FaultKind::Execution, error.to_string());
        }
        return;
    }

    let Some(parent) = parent else {
        return;
    };
    if !context.is_active(parent) || !context.all_children_terminal(parent) {
        return;
    }
    let Some(parent_node) = context.node_for(parent) else {
        return;
    };

    let failure = {
        let mut ctx = ActivityExecutionContext::new(context, parent, Arc::clone(&parent_node));
        let mut failure = None;
        for behavior in parent_node.behaviors() {
            if let Err(error) = behavior.on_children_completed(&mut ctx).await {
                failure = Some(error);
                break;
            }
        }
        failure
    };
    if let Some(error) = failure {
        context.fault_instance(parent, FaultKind::Execution, error.to_string());
    }
}
