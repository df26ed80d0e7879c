//! Integration tests for the run loop, driven through WorkflowRunner
//!
//! Run with: cargo test -p arbor-engine --test run_loop_test

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use arbor_engine::activities::{
    Break, Cancel, Event, Fault, ForEach, Parallel, Sequence, SetVariable,
};
use arbor_engine::activity::{properties, CancelBehavior};
use arbor_engine::engine::{BroadcastPublisher, WorkflowNotification};
use arbor_engine::prelude::*;
use arbor_engine::workflow::{
    payload_hash, ActivityStatus, ExecutionEvent, FaultKind, Input, PropertyValue,
};

use common::*;

fn approval_workflow() -> Arc<Workflow> {
    workflow(
        "approval",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                record("before", "before"),
                NodeBuilder::new("wait", Event)
                    .with_input(Event::NAME, literal(json!("approved")))
                    .with_output(Event::PAYLOAD, "approval"),
                record("after", "after"),
            ],
        ),
    )
}

// ============================================
// Loops
// ============================================

#[test_log::test(tokio::test)]
async fn test_for_each_runs_body_once_per_item() {
    let workflow = workflow(
        "for-each",
        NodeBuilder::new("loop", ForEach)
            .with_input(ForEach::ITEMS, literal(json!(["a", "b", "c"])))
            .with_output(ForEach::CURRENT_VALUE, "item")
            .with_child(
                ForEach::BODY,
                record("body", "unused").with_input(Record::VALUE, Input::variable("item")),
            ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(trace(&result.workflow_state), vec![json!("a"), json!("b"), json!("c")]);

    let indexes = property(&result.workflow_state, "loop:body", ForEach::CURRENT_INDEX);
    assert_eq!(
        indexes,
        vec![
            &PropertyValue::Integer(0),
            &PropertyValue::Integer(1),
            &PropertyValue::Integer(2)
        ]
    );
    let values = property(&result.workflow_state, "loop:body", ForEach::CURRENT_VALUE);
    assert_eq!(values[2], &PropertyValue::Structured(json!("c")));
}

#[test_log::test(tokio::test)]
async fn test_for_each_break_on_second_of_five() {
    let workflow = workflow(
        "for-each-break",
        NodeBuilder::new("loop", ForEach)
            .with_input(ForEach::ITEMS, literal(json!([1, 2, 3, 4, 5])))
            .with_output(ForEach::CURRENT_VALUE, "item")
            .with_child(
                ForEach::BODY,
                NodeBuilder::new("body", Sequence).with_children(
                    Sequence::PORT,
                    [
                        record("record", "unused")
                            .with_input(Record::VALUE, Input::variable("item")),
                        NodeBuilder::new("stop", BreakWhen { at: json!(2) }),
                        record("unreached", "after-break")
                            .with_input(Record::VALUE, Input::variable("item")),
                    ],
                ),
            ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    // Iteration 2 stops before its last step and no iteration follows
    assert_eq!(
        trace(&result.workflow_state),
        vec![json!(1), json!(1), json!(2)]
    );
    assert_eq!(result.workflow_state.instances_of("loop:body").count(), 2);
    assert_eq!(
        property(&result.workflow_state, "loop", "breaking"),
        vec![&PropertyValue::Bool(true)]
    );
}

#[test_log::test(tokio::test)]
async fn test_break_directly_in_loop_body() {
    let workflow = workflow(
        "break",
        NodeBuilder::new("loop", ForEach)
            .with_input(ForEach::ITEMS, literal(json!([1, 2, 3])))
            .with_child(ForEach::BODY, NodeBuilder::new("stop", Break)),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(result.workflow_state.instances_of("loop:stop").count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_for_each_over_empty_list_completes() {
    let workflow = workflow(
        "empty",
        NodeBuilder::new("loop", ForEach)
            .with_input(ForEach::ITEMS, literal(json!([])))
            .with_child(ForEach::BODY, record("body", "never")),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert!(trace(&result.workflow_state).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_for_each_rejects_non_list_items() {
    let workflow = workflow(
        "bad-items",
        NodeBuilder::new("loop", ForEach)
            .with_input(ForEach::ITEMS, literal(json!({"not": "a list"})))
            .with_child(ForEach::BODY, record("body", "never")),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Faulted);
    let fault = result.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::Execution);
    assert_eq!(fault.node_id.as_deref(), Some("loop"));
}

// ============================================
// Ordering and determinism
// ============================================

#[test_log::test(tokio::test)]
async fn test_siblings_run_in_fifo_order() {
    let workflow = workflow(
        "fifo",
        NodeBuilder::new("root", Parallel).with_children(
            Parallel::PORT,
            [
                NodeBuilder::new("left", Sequence)
                    .with_children(Sequence::PORT, [record("a1", "a1"), record("a2", "a2")]),
                NodeBuilder::new("right", Sequence)
                    .with_children(Sequence::PORT, [record("b1", "b1"), record("b2", "b2")]),
            ],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(
        trace(&result.workflow_state),
        vec![json!("a1"), json!("b1"), json!("a2"), json!("b2")]
    );
}

#[test_log::test(tokio::test)]
async fn test_uncontinued_child_runs_before_later_continued_sibling() {
    let workflow = workflow(
        "mixed-continuations",
        NodeBuilder::new("root", FireThenAwait).with_children(
            FireThenAwait::CHILDREN,
            [record("a", "A"), record("b", "B")],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(trace(&result.workflow_state), vec![json!("A"), json!("B")]);

    let started: Vec<&str> = result
        .workflow_state
        .execution_log
        .iter()
        .filter(|entry| entry.event == ExecutionEvent::Started)
        .map(|entry| entry.node_id.as_str())
        .collect();
    assert_eq!(started, vec!["root", "root:a", "root:b"]);
}

#[test_log::test(tokio::test)]
async fn test_identical_runs_schedule_identical_nodes() {
    let workflow = workflow(
        "determinism",
        NodeBuilder::new("root", Parallel).with_children(
            Parallel::PORT,
            [
                NodeBuilder::new("loop", ForEach)
                    .with_input(ForEach::ITEMS, literal(json!([1, 2])))
                    .with_child(ForEach::BODY, record("body", "body")),
                record("side", "side"),
            ],
        ),
    );
    let runner = WorkflowRunner::new();

    let first = runner
        .run_new(Arc::clone(&workflow), RunOptions::new())
        .await
        .unwrap();
    let second = runner.run_new(workflow, RunOptions::new()).await.unwrap();

    let nodes = |result: &RunResult| -> Vec<String> {
        result
            .workflow_state
            .activity_instances
            .iter()
            .map(|instance| instance.node_id.clone())
            .collect()
    };
    assert_eq!(nodes(&first), nodes(&second));
    assert_eq!(
        first.workflow_state.execution_log,
        second.workflow_state.execution_log
    );
    assert_ne!(first.instance_id(), second.instance_id());
}

// ============================================
// Bookmarks
// ============================================

#[test_log::test(tokio::test)]
async fn test_event_suspends_and_resumes() {
    let workflow = approval_workflow();
    let runner = WorkflowRunner::new();

    let suspended = runner
        .run_new(Arc::clone(&workflow), RunOptions::new())
        .await
        .unwrap();

    assert_eq!(suspended.status(), WorkflowStatus::Suspended);
    assert_eq!(trace(&suspended.workflow_state), vec![json!("before")]);
    assert_eq!(suspended.bookmarks().len(), 1);

    let bookmark = suspended.bookmarks()[0].clone();
    let expected = payload_hash("Event", &json!({"name": "approved"}));
    assert_eq!(bookmark.payload_hash, expected);
    assert_eq!(bookmark.payload_hash, Event::hash("approved"));
    assert_eq!(bookmark.activity_node_id, "root:wait");

    let resumed = runner
        .run_from_state(
            Arc::clone(&workflow),
            suspended.workflow_state.clone(),
            ResumeFrom::Bookmark(bookmark.id.clone()),
            RunOptions::new().with_input("approved_by", json!("alice")),
        )
        .await
        .unwrap();

    assert_eq!(resumed.status(), WorkflowStatus::Finished);
    assert!(resumed.bookmarks().is_empty());
    assert_eq!(
        trace(&resumed.workflow_state),
        vec![json!("before"), json!("after")]
    );
    assert_eq!(
        resumed.workflow_state.memory.get("approval"),
        Some(&json!({"approved_by": "alice"}))
    );
    assert_eq!(resumed.instance_id(), suspended.instance_id());

    // A finished instance accepts no further resumes
    let again = runner
        .run_from_state(
            workflow,
            resumed.workflow_state,
            ResumeFrom::Bookmark(bookmark.id),
            RunOptions::new(),
        )
        .await;
    assert!(matches!(
        again,
        Err(RunnerError::InstanceClosed { status: WorkflowStatus::Finished, .. })
    ));
}

#[test_log::test(tokio::test)]
async fn test_resume_correlation_id_overrides_persisted_one() {
    let workflow = approval_workflow();
    let runner = WorkflowRunner::new();

    let suspended = runner
        .run_new(
            Arc::clone(&workflow),
            RunOptions::new().with_correlation_id("order-1"),
        )
        .await
        .unwrap();
    let bookmark = suspended.bookmarks()[0].id.clone();

    let kept = runner
        .run_from_state(
            Arc::clone(&workflow),
            suspended.workflow_state.clone(),
            ResumeFrom::Bookmark(bookmark.clone()),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(kept.workflow_state.correlation_id.as_deref(), Some("order-1"));

    let overridden = runner
        .run_from_state(
            workflow,
            suspended.workflow_state,
            ResumeFrom::Bookmark(bookmark),
            RunOptions::new().with_correlation_id("order-2"),
        )
        .await
        .unwrap();
    assert_eq!(overridden.status(), WorkflowStatus::Finished);
    assert_eq!(
        overridden.workflow_state.correlation_id.as_deref(),
        Some("order-2")
    );
}

#[test_log::test(tokio::test)]
async fn test_parallel_events_resume_independently() {
    let workflow = workflow(
        "two-events",
        NodeBuilder::new("root", Parallel).with_children(
            Parallel::PORT,
            [
                NodeBuilder::new("first", Event).with_input(Event::NAME, literal(json!("one"))),
                NodeBuilder::new("second", Event).with_input(Event::NAME, literal(json!("two"))),
            ],
        ),
    );
    let runner = WorkflowRunner::new();

    let suspended = runner
        .run_new(Arc::clone(&workflow), RunOptions::new())
        .await
        .unwrap();
    assert_eq!(suspended.status(), WorkflowStatus::Suspended);
    assert_eq!(suspended.bookmarks().len(), 2);

    let first = suspended
        .bookmarks()
        .iter()
        .find(|bookmark| bookmark.payload_hash == Event::hash("one"))
        .unwrap()
        .id
        .clone();
    let partial = runner
        .run_from_state(
            Arc::clone(&workflow),
            suspended.workflow_state,
            ResumeFrom::Bookmark(first),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(partial.status(), WorkflowStatus::Suspended);
    assert_eq!(partial.bookmarks().len(), 1);
    assert_eq!(partial.bookmarks()[0].payload_hash, Event::hash("two"));

    let second = partial.bookmarks()[0].id.clone();
    let finished = runner
        .run_from_state(
            workflow,
            partial.workflow_state,
            ResumeFrom::Bookmark(second),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(finished.status(), WorkflowStatus::Finished);
}

#[test_log::test(tokio::test)]
async fn test_resume_by_activity_id() {
    let workflow = approval_workflow();
    let runner = WorkflowRunner::new();

    let suspended = runner
        .run_new(Arc::clone(&workflow), RunOptions::new())
        .await
        .unwrap();

    let resumed = runner
        .run_from_state(
            Arc::clone(&workflow),
            suspended.workflow_state.clone(),
            ResumeFrom::Activity("after".to_string()),
            RunOptions::new(),
        )
        .await
        .unwrap();

    // The event is still waiting, so the root cannot finish
    assert_eq!(resumed.status(), WorkflowStatus::Suspended);
    assert_eq!(
        trace(&resumed.workflow_state),
        vec![json!("before"), json!("after")]
    );
    let after = resumed.workflow_state.instances_of("root:after").next().unwrap();
    assert_eq!(after.parent, resumed.workflow_state.root);

    let unknown = runner
        .run_from_state(
            workflow,
            suspended.workflow_state,
            ResumeFrom::Activity("missing".to_string()),
            RunOptions::new(),
        )
        .await;
    assert!(matches!(unknown, Err(RunnerError::ResumeMismatch { .. })));
}

#[test_log::test(tokio::test)]
async fn test_state_from_other_definition_is_rejected() {
    let suspended = WorkflowRunner::new()
        .run_new(approval_workflow(), RunOptions::new())
        .await
        .unwrap();

    let other = Arc::new(
        Workflow::new("approval", 2, NodeBuilder::new("root", Sequence)).unwrap(),
    );
    let bookmark = suspended.bookmarks()[0].id.clone();
    let result = WorkflowRunner::new()
        .run_from_state(
            other,
            suspended.workflow_state,
            ResumeFrom::Bookmark(bookmark),
            RunOptions::new(),
        )
        .await;

    assert!(matches!(result, Err(RunnerError::DefinitionMismatch { .. })));
}

// ============================================
// Commit strategies
// ============================================

#[test_log::test(tokio::test)]
async fn test_commit_strategies_snapshot_around_activities() {
    let workflow = workflow(
        "commits",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                record("a", "a").with_commit_strategy(CommitStrategy::Executed),
                record("b", "b").with_commit_strategy(CommitStrategy::Executing),
                record("c", "c"),
            ],
        ),
    );
    let commits = Arc::new(RecordingCommits::default());

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new().with_commit_handler(commits.clone()))
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(
        trace(&result.workflow_state),
        vec![json!("a"), json!("b"), json!("c")]
    );

    let snapshots = commits.snapshots();
    assert_eq!(snapshots.len(), 2);
    for snapshot in &snapshots {
        assert_eq!(snapshot.status, WorkflowStatus::Running);
        assert_eq!(trace(snapshot), vec![json!("a")]);
    }

    // After `a`: `b` is queued but has not started
    let b_after_a = snapshots[0].instances_of("root:b").next().unwrap();
    assert_eq!(b_after_a.status, ActivityStatus::Pending);
    assert_eq!(snapshots[0].scheduled.len(), 1);

    // Before `b` executes: it is marked running
    let b_before = snapshots[1].instances_of("root:b").next().unwrap();
    assert_eq!(b_before.status, ActivityStatus::Running);
}

#[test_log::test(tokio::test)]
async fn test_workflow_commit_strategy_applies_to_every_node() {
    let workflow = Arc::new(
        Workflow::new(
            "commit-all",
            1,
            NodeBuilder::new("root", Sequence)
                .with_children(Sequence::PORT, [record("a", "a"), record("b", "b")]),
        )
        .unwrap()
        .with_commit_strategy(CommitStrategy::Executed),
    );
    let commits = Arc::new(RecordingCommits::default());

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new().with_commit_handler(commits.clone()))
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    // root, a and b each commit once
    assert_eq!(commits.snapshots().len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_failed_commit_faults_the_run() {
    let workflow = workflow(
        "commit-fails",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                record("a", "a").with_commit_strategy(CommitStrategy::Executing),
                record("b", "b"),
            ],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(
            workflow,
            RunOptions::new().with_commit_handler(Arc::new(FailingCommits)),
        )
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Faulted);
    assert!(trace(&result.workflow_state).is_empty());
    let fault = result.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::Commit);
    assert_eq!(fault.node_id.as_deref(), Some("root:a"));
}

#[test_log::test(tokio::test)]
async fn test_commit_strategy_without_handler_is_ignored() {
    let workflow = workflow(
        "commit-unhandled",
        NodeBuilder::new("root", Sequence).with_child(
            Sequence::PORT,
            record("a", "a").with_commit_strategy(CommitStrategy::ExecutingAndExecuted),
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(trace(&result.workflow_state), vec![json!("a")]);
}

// ============================================
// Cancellation scopes
// ============================================

#[test_log::test(tokio::test)]
async fn test_cancel_signal_closes_the_nearest_scope() {
    let workflow = workflow(
        "cancel-scope",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                NodeBuilder::new("scope", Parallel)
                    .with_behavior(CancelBehavior)
                    .with_children(
                        Parallel::PORT,
                        [
                            NodeBuilder::new("wait", Event)
                                .with_input(Event::NAME, literal(json!("never"))),
                            NodeBuilder::new("work", Sequence).with_children(
                                Sequence::PORT,
                                [
                                    record("a", "a"),
                                    NodeBuilder::new("stop", Cancel)
                                        .with_input(Cancel::REASON, literal(json!("done early"))),
                                    record("skipped", "skipped"),
                                ],
                            ),
                        ],
                    ),
                record("after", "after"),
            ],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert!(result.bookmarks().is_empty());
    assert_eq!(trace(&result.workflow_state), vec![json!("a"), json!("after")]);

    let state = &result.workflow_state;
    let status_of = |node_id: &str| state.instances_of(node_id).next().unwrap().status;
    assert_eq!(status_of("root:scope"), ActivityStatus::Completed);
    assert_eq!(status_of("root:scope:wait"), ActivityStatus::Canceled);
    assert_eq!(status_of("root:scope:work"), ActivityStatus::Canceled);
    assert_eq!(status_of("root:scope:work:stop"), ActivityStatus::Canceled);
    assert_eq!(state.instances_of("root:scope:work:skipped").count(), 0);
    assert_eq!(
        property(state, "root:scope", properties::CANCEL_REASON),
        vec![&PropertyValue::String("done early".to_string())]
    );
}

#[test_log::test(tokio::test)]
async fn test_cancel_without_scope_just_completes() {
    let workflow = workflow(
        "cancel-unscoped",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [NodeBuilder::new("stop", Cancel), record("after", "after")],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(trace(&result.workflow_state), vec![json!("after")]);
}

// ============================================
// Faults
// ============================================

#[test_log::test(tokio::test)]
async fn test_unhandled_fault_faults_the_run() {
    let workflow = workflow(
        "faulty",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                record("first", "first"),
                NodeBuilder::new("boom", Fault).with_input(Fault::MESSAGE, literal(json!("boom"))),
                record("never", "never"),
            ],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Faulted);
    assert_eq!(trace(&result.workflow_state), vec![json!("first")]);

    let fault = result.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::Execution);
    assert_eq!(fault.node_id.as_deref(), Some("root:boom"));
    assert_eq!(fault.message, "fault: boom");

    let boom = result.workflow_state.instances_of("root:boom").next().unwrap();
    assert_eq!(boom.status, ActivityStatus::Faulted);
}

#[test_log::test(tokio::test)]
async fn test_faulted_instance_rejects_resume_of_remaining_bookmark() {
    let workflow = workflow(
        "fault-beside-event",
        NodeBuilder::new("root", Parallel).with_children(
            Parallel::PORT,
            [
                NodeBuilder::new("wait", Event).with_input(Event::NAME, literal(json!("go"))),
                NodeBuilder::new("boom", Fault).with_input(Fault::MESSAGE, literal(json!("boom"))),
            ],
        ),
    );
    let runner = WorkflowRunner::new();

    let faulted = runner
        .run_new(Arc::clone(&workflow), RunOptions::new())
        .await
        .unwrap();
    assert_eq!(faulted.status(), WorkflowStatus::Faulted);
    assert_eq!(faulted.bookmarks().len(), 1);

    let bookmark = faulted.bookmarks()[0].id.clone();
    let resumed = runner
        .run_from_state(
            Arc::clone(&workflow),
            faulted.workflow_state.clone(),
            ResumeFrom::Bookmark(bookmark),
            RunOptions::new(),
        )
        .await;
    assert!(matches!(
        resumed,
        Err(RunnerError::InstanceClosed { status: WorkflowStatus::Faulted, .. })
    ));

    let by_activity = runner
        .run_from_state(
            workflow,
            faulted.workflow_state.clone(),
            ResumeFrom::Activity("wait".to_string()),
            RunOptions::new(),
        )
        .await;
    assert!(matches!(by_activity, Err(RunnerError::InstanceClosed { .. })));
}

#[test_log::test(tokio::test)]
async fn test_handled_fault_reports_to_owner() {
    let workflow = workflow(
        "guarded",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                NodeBuilder::new("guard", Guard).with_child(
                    Guard::BODY,
                    NodeBuilder::new("boom", Fault)
                        .with_input(Fault::MESSAGE, literal(json!("boom"))),
                ),
                record("after", "after"),
            ],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert!(result.fault().is_none());
    assert_eq!(result.workflow_state.memory.get("caught"), Some(&json!(true)));
    assert_eq!(trace(&result.workflow_state), vec![json!("after")]);
    assert_eq!(
        property(&result.workflow_state, "root:guard", "caught_from"),
        vec![&PropertyValue::String("root:guard:boom".to_string())]
    );
}

#[test_log::test(tokio::test)]
async fn test_suspension_without_bookmark_faults() {
    let workflow = workflow(
        "stuck",
        NodeBuilder::new("root", Sequence)
            .with_child(Sequence::PORT, NodeBuilder::new("stuck", Stuck)),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Faulted);
    assert_eq!(result.fault().unwrap().kind, FaultKind::SuspensionWithoutBookmark);
}

#[test_log::test(tokio::test)]
async fn test_parent_is_never_completed_implicitly() {
    let workflow = workflow(
        "detached",
        NodeBuilder::new("root", Detach).with_child("children", record("child", "child")),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(trace(&result.workflow_state), vec![json!("child")]);
    assert_eq!(result.status(), WorkflowStatus::Faulted);
    assert_eq!(result.fault().unwrap().kind, FaultKind::Stalled);
}

#[test_log::test(tokio::test)]
async fn test_invalid_definition_faults_before_executing() {
    let workflow = workflow(
        "invalid",
        NodeBuilder::new("root", Sequence).with_child(
            Sequence::PORT,
            NodeBuilder::new("loop", ForEach).with_child(ForEach::BODY, record("body", "body")),
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Faulted);
    let fault = result.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::Validation);
    assert!(fault.message.contains("root:loop"));
    assert!(result.workflow_state.activity_instances.is_empty());
}

// ============================================
// Run loop control
// ============================================

#[test_log::test(tokio::test)]
async fn test_activity_that_cannot_execute_is_skipped() {
    let workflow = workflow(
        "skip",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [NodeBuilder::new("gate", Disabled), record("after", "after")],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(trace(&result.workflow_state), vec![json!("after")]);

    let gate = result.workflow_state.instances_of("root:gate").next().unwrap();
    assert_eq!(gate.status, ActivityStatus::Completed);
    assert!(result
        .workflow_state
        .execution_log
        .iter()
        .any(|entry| entry.node_id == "root:gate" && entry.event == ExecutionEvent::Skipped));
}

#[test_log::test(tokio::test)]
async fn test_cancellation_stops_between_items() {
    let token = CancellationToken::new();
    let workflow = workflow(
        "cancel",
        NodeBuilder::new("root", Sequence).with_children(
            Sequence::PORT,
            [
                record("first", "first"),
                NodeBuilder::new("cancel", CancelRun { token: token.clone() }),
                record("never", "never"),
            ],
        ),
    );

    let result = WorkflowRunner::new()
        .run_new(workflow, RunOptions::new().with_cancellation(token))
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Canceled);
    assert_eq!(trace(&result.workflow_state), vec![json!("first")]);
    // The unprocessed work item stays in the snapshot
    assert_eq!(result.workflow_state.scheduled.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_tick_budget_bounds_a_run() {
    let workflow = workflow(
        "budget",
        NodeBuilder::new("loop", ForEach)
            .with_input(ForEach::ITEMS, literal(json!([1, 2, 3, 4, 5, 6, 7, 8, 9, 10])))
            .with_child(ForEach::BODY, record("body", "body")),
    );

    let result = WorkflowRunner::new()
        .with_config(EngineConfig::default().with_max_ticks_per_run(5))
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Faulted);
    assert_eq!(result.fault().unwrap().kind, FaultKind::TickBudgetExceeded);
    assert_eq!(trace(&result.workflow_state).len(), 4);
    assert_eq!(result.workflow_state.scheduled.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_result_variable_and_execution_log_toggle() {
    let workflow = Arc::new(
        Workflow::new(
            "result",
            1,
            NodeBuilder::new("root", SetVariable::new("answer"))
                .with_input(SetVariable::VALUE, literal(json!(42))),
        )
        .unwrap()
        .with_result_variable("answer"),
    );

    let result = WorkflowRunner::new()
        .with_config(EngineConfig::default().with_execution_log(false))
        .run_new(workflow, RunOptions::new())
        .await
        .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Finished);
    assert_eq!(result.output, Some(json!(42)));
    assert!(result.workflow_state.execution_log.is_empty());
}

// ============================================
// Notifications
// ============================================

#[test_log::test(tokio::test)]
async fn test_notifications_around_a_suspending_run() {
    let publisher = Arc::new(BroadcastPublisher::new(16));
    let mut receiver = publisher.subscribe();

    let result = WorkflowRunner::new()
        .with_publisher(publisher)
        .run_new(approval_workflow(), RunOptions::new().with_instance_id("wf-1"))
        .await
        .unwrap();
    assert_eq!(result.instance_id(), "wf-1");

    assert!(matches!(
        receiver.recv().await.unwrap(),
        WorkflowNotification::WorkflowExecuting { .. }
    ));
    match receiver.recv().await.unwrap() {
        WorkflowNotification::BookmarksCreated { payload_hashes, .. } => {
            assert_eq!(payload_hashes, vec![Event::hash("approved")]);
        }
        other => panic!("unexpected notification: {other:?}"),
    }
    match receiver.recv().await.unwrap() {
        WorkflowNotification::WorkflowExecuted {
            instance_id,
            status,
            bookmarks,
            ..
        } => {
            assert_eq!(instance_id, "wf-1");
            assert_eq!(status, WorkflowStatus::Suspended);
            assert_eq!(bookmarks, 1);
        }
        other => panic!("unexpected notification: {other:?}"),
    }
}
