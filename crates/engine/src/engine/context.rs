//! Workflow execution context: everything one run of one instance owns

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::activity_context::SignalContext;
use super::commit::CommitStateHandler;
use super::runner::RunnerError;
use super::scheduler::{Continuation, WorkItem, WorkQueue};
use crate::activity::ActivityNode;
use crate::config::EngineConfig;
use crate::workflow::{
    ActivityInstance, ActivityStatus, Bookmark, ExecutionEvent, ExecutionLogEntry,
    ExpressionEvaluator, FaultKind, InstanceId, MemoryRegister, NoExpressionEvaluator,
    PropertyValue, Signal, Workflow, WorkflowFault, WorkflowState, WorkflowStatus,
    WorkflowSubStatus,
};

/// A finished instance waiting to be reported to its owner or parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Mark the instance completed, then report it
    Complete(InstanceId),
    /// The instance already faulted and an ancestor handled it; report it
    Faulted(InstanceId),
}

impl Transition {
    fn instance(self) -> InstanceId {
        match self {
            Self::Complete(id) | Self::Faulted(id) => id,
        }
    }
}

/// Runtime state of one workflow instance while a run loop drives it
///
/// Owns the arena of activity instances, the work queue, the bookmarks and
/// the memory register. Nothing in it is shared with other runs except the
/// workflow definition.
pub struct WorkflowExecutionContext {
    workflow: Arc<Workflow>,
    id: String,
    correlation_id: Option<String>,
    status: WorkflowStatus,
    sub_status: WorkflowSubStatus,
    root: Option<InstanceId>,
    instances: Vec<ActivityInstance>,
    pub(crate) work_queue: WorkQueue,
    bookmarks: Vec<Bookmark>,
    memory: MemoryRegister,
    result: Option<serde_json::Value>,
    fault: Option<WorkflowFault>,
    execution_log: Vec<ExecutionLogEntry>,
    log_sequence: u64,
    input: BTreeMap<String, serde_json::Value>,
    resumed_bookmark: Option<Bookmark>,
    transitions: VecDeque<Transition>,
    cancellation: CancellationToken,
    canceled: bool,
    evaluator: Arc<dyn ExpressionEvaluator>,
    commit_handler: Option<Arc<dyn CommitStateHandler>>,
    config: EngineConfig,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowExecutionContext {
    /// Fresh context for a new instance, with workflow variables seeded
    pub(crate) fn new(
        workflow: Arc<Workflow>,
        id: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        let mut memory = MemoryRegister::new();
        for variable in workflow.variables() {
            memory.set(variable.name.clone(), variable.default.clone());
        }

        let now = Utc::now();
        Self {
            workflow,
            id: id.into(),
            correlation_id,
            status: WorkflowStatus::Running,
            sub_status: WorkflowSubStatus::Pending,
            root: None,
            instances: Vec::new(),
            work_queue: WorkQueue::new(),
            bookmarks: Vec::new(),
            memory,
            result: None,
            fault: None,
            execution_log: Vec::new(),
            log_sequence: 0,
            input: BTreeMap::new(),
            resumed_bookmark: None,
            transitions: VecDeque::new(),
            cancellation: CancellationToken::new(),
            canceled: false,
            evaluator: Arc::new(NoExpressionEvaluator),
            commit_handler: None,
            config: EngineConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rehydrate a context from a persisted snapshot
    ///
    /// Every persisted instance must still map onto a node of the same
    /// activity type and version in `workflow`.
    pub(crate) fn from_state(
        workflow: Arc<Workflow>,
        state: WorkflowState,
    ) -> Result<Self, RunnerError> {
        let mismatch = |reason: String| RunnerError::DefinitionMismatch {
            instance_id: state.id.clone(),
            reason,
        };

        if state.definition_id != workflow.definition_id()
            || state.definition_version != workflow.version()
        {
            return Err(mismatch(format!(
                "state was created by {}@{}, definition is {}@{}",
                state.definition_id,
                state.definition_version,
                workflow.definition_id(),
                workflow.version()
            )));
        }

        for instance in &state.activity_instances {
            let Some(node) = workflow.node(&instance.node_id) else {
                return Err(mismatch(format!("unknown node {}", instance.node_id)));
            };
            if node.activity_type() != instance.activity_type || node.version() != instance.version {
                return Err(mismatch(format!(
                    "node {} is {}@{}, instance {} was created as {}@{}",
                    instance.node_id,
                    node.activity_type(),
                    node.version(),
                    instance.id,
                    instance.activity_type,
                    instance.version
                )));
            }
        }

        let log_sequence = state
            .execution_log
            .last()
            .map_or(0, |entry| entry.sequence + 1);

        Ok(Self {
            workflow,
            id: state.id,
            correlation_id: state.correlation_id,
            status: state.status,
            sub_status: state.sub_status,
            root: state.root,
            instances: state.activity_instances,
            work_queue: WorkQueue::from_items(state.scheduled),
            bookmarks: state.bookmarks,
            memory: state.memory,
            result: state.result,
            fault: state.fault,
            execution_log: state.execution_log,
            log_sequence,
            input: BTreeMap::new(),
            resumed_bookmark: None,
            transitions: VecDeque::new(),
            cancellation: CancellationToken::new(),
            canceled: false,
            evaluator: Arc::new(NoExpressionEvaluator),
            commit_handler: None,
            config: EngineConfig::default(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    pub(crate) fn with_input(mut self, input: BTreeMap<String, serde_json::Value>) -> Self {
        self.input = input;
        self
    }

    pub(crate) fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub(crate) fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub(crate) fn with_commit_handler(
        mut self,
        commit_handler: Option<Arc<dyn CommitStateHandler>>,
    ) -> Self {
        self.commit_handler = commit_handler;
        self
    }

    /// Snapshot for persistence
    pub fn to_state(&self) -> WorkflowState {
        WorkflowState {
            id: self.id.clone(),
            definition_id: self.workflow.definition_id().to_string(),
            definition_version: self.workflow.version(),
            correlation_id: self.correlation_id.clone(),
            status: self.status,
            sub_status: self.sub_status,
            root: self.root,
            activity_instances: self.instances.clone(),
            scheduled: self.work_queue.to_vec(),
            bookmarks: self.bookmarks.clone(),
            memory: self.memory.clone(),
            result: self.result.clone(),
            fault: self.fault.clone(),
            execution_log: self.execution_log.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    // ========================================================================
    // Read access
    // ========================================================================

    /// Workflow instance id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn sub_status(&self) -> WorkflowSubStatus {
        self.sub_status
    }

    pub fn root(&self) -> Option<InstanceId> {
        self.root
    }

    pub fn instance(&self, id: InstanceId) -> Option<&ActivityInstance> {
        self.instances.get(id.index())
    }

    pub fn instances(&self) -> &[ActivityInstance] {
        &self.instances
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn memory(&self) -> &MemoryRegister {
        &self.memory
    }

    pub fn fault(&self) -> Option<&WorkflowFault> {
        self.fault.as_ref()
    }

    pub fn execution_log(&self) -> &[ExecutionLogEntry] {
        &self.execution_log
    }

    /// Input supplied by the caller for this run only
    pub fn input(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.input
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pending_work(&self) -> usize {
        self.work_queue.len()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    pub(crate) fn commit_handler(&self) -> Option<Arc<dyn CommitStateHandler>> {
        self.commit_handler.clone()
    }

    pub(crate) fn memory_mut(&mut self) -> &mut MemoryRegister {
        &mut self.memory
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Option<&mut ActivityInstance> {
        self.instances.get_mut(id.index())
    }

    pub(crate) fn node_for(&self, id: InstanceId) -> Option<Arc<ActivityNode>> {
        let instance = self.instance(id)?;
        self.workflow.node(&instance.node_id).cloned()
    }

    pub(crate) fn is_active(&self, id: InstanceId) -> bool {
        self.instance(id)
            .is_some_and(|instance| !instance.status.is_terminal())
    }

    pub(crate) fn has_active_children(&self, id: InstanceId) -> bool {
        self.instance(id).is_some_and(|instance| {
            instance.children.iter().any(|child| self.is_active(*child))
        })
    }

    pub(crate) fn all_children_terminal(&self, id: InstanceId) -> bool {
        !self.has_active_children(id)
    }

    pub(crate) fn is_ancestor(&self, ancestor: InstanceId, of: InstanceId) -> bool {
        let mut current = self.instance(of).and_then(|instance| instance.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.instance(id).and_then(|instance| instance.parent);
        }
        false
    }

    /// Whether an instance that reported `Running` still has something that
    /// will eventually advance it
    pub(crate) fn has_pending_work(&self, id: InstanceId) -> bool {
        !self.is_active(id)
            || self.transitions.iter().any(|t| t.instance() == id)
            || self.work_queue.contains(id)
            || self.has_active_children(id)
            || self.has_bookmarks(id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub(crate) fn transition_to(&mut self, sub_status: WorkflowSubStatus) {
        debug!(instance_id = %self.id, from = %self.sub_status, to = %sub_status, "sub-status transition");
        self.sub_status = sub_status;
        if sub_status == WorkflowSubStatus::Executing {
            self.status = WorkflowStatus::Running;
        }
    }

    pub(crate) fn mark_canceled(&mut self) {
        self.canceled = true;
    }

    pub(crate) fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub(crate) fn set_fault(&mut self, fault: WorkflowFault) {
        warn!(instance_id = %self.id, %fault, "workflow faulted");
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// Fail the run before anything executes
    pub(crate) fn reject(&mut self, fault: WorkflowFault) {
        self.set_fault(fault);
        self.status = WorkflowStatus::Faulted;
        self.sub_status = WorkflowSubStatus::Idle;
        self.updated_at = Utc::now();
    }

    /// Settle the final status once the run loop halted
    ///
    /// Precedence: a recorded fault, then cancellation, then a finished root,
    /// then outstanding bookmarks. Anything else is a stalled run.
    pub(crate) fn finalize(&mut self) {
        let root_finished = self
            .root
            .and_then(|root| self.instance(root))
            .is_some_and(|root| root.status.is_terminal());

        self.status = if self.fault.is_some() {
            WorkflowStatus::Faulted
        } else if self.canceled {
            WorkflowStatus::Canceled
        } else if root_finished {
            self.bookmarks.clear();
            WorkflowStatus::Finished
        } else if !self.bookmarks.is_empty() {
            WorkflowStatus::Suspended
        } else {
            self.set_fault(WorkflowFault::new(
                FaultKind::Stalled,
                "work queue drained without finishing the root or creating a bookmark",
            ));
            WorkflowStatus::Faulted
        };

        self.sub_status = WorkflowSubStatus::Idle;
        self.result = self
            .workflow
            .result_variable()
            .and_then(|name| self.memory.get(name).cloned());
        self.updated_at = Utc::now();
    }

    pub(crate) fn log(&mut self, id: InstanceId, event: ExecutionEvent) {
        if !self.config.record_execution_log {
            return;
        }
        let Some(instance) = self.instances.get(id.index()) else {
            return;
        };
        let entry = ExecutionLogEntry {
            sequence: self.log_sequence,
            instance_id: id,
            node_id: instance.node_id.clone(),
            activity_type: instance.activity_type.clone(),
            event,
        };
        self.log_sequence += 1;
        self.execution_log.push(entry);
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Add a pending instance of `node` to the arena
    pub(crate) fn create_instance(
        &mut self,
        node: &ActivityNode,
        parent: Option<InstanceId>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> InstanceId {
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(ActivityInstance {
            id,
            node_id: node.node_id().to_string(),
            activity_type: node.activity_type().to_string(),
            version: node.version(),
            status: ActivityStatus::Pending,
            parent,
            properties,
            children: Vec::new(),
            continuation: None,
            fault: None,
        });
        if let Some(parent) = parent.and_then(|parent| self.instance_mut(parent)) {
            parent.children.push(id);
        }
        self.log(id, ExecutionEvent::Scheduled);
        id
    }

    pub(crate) fn schedule(&mut self, target: InstanceId, continuation: Option<Continuation>) {
        self.work_queue.push(WorkItem {
            target,
            continuation,
        });
    }

    /// Create and enqueue the root instance of a new run
    pub(crate) fn schedule_root(&mut self) -> InstanceId {
        let node = Arc::clone(self.workflow.root());
        let root = self.create_instance(&node, None, BTreeMap::new());
        self.root = Some(root);
        self.schedule(root, None);
        root
    }

    /// Consume a bookmark and enqueue the instance that created it
    pub(crate) fn schedule_bookmark(&mut self, bookmark_id: &str) -> Result<InstanceId, RunnerError> {
        let position = self
            .bookmarks
            .iter()
            .position(|bookmark| bookmark.id == bookmark_id)
            .ok_or_else(|| self.resume_mismatch(bookmark_id))?;

        let target = self.bookmarks[position].activity_instance_id;
        if !self.is_active(target) {
            return Err(self.resume_mismatch(bookmark_id));
        }

        let bookmark = self.bookmarks.remove(position);
        debug!(instance_id = %self.id, bookmark_id, activity_instance = %target, "resuming bookmark");
        self.log(target, ExecutionEvent::Resumed);
        self.schedule(target, None);
        self.resumed_bookmark = Some(bookmark);
        Ok(target)
    }

    /// Enqueue an activity by the id it was given in the definition
    ///
    /// Reuses the latest non-terminal instance of the node, or creates a new
    /// one under the latest instance of its structural parent.
    pub(crate) fn schedule_activity(&mut self, activity_id: &str) -> Result<InstanceId, RunnerError> {
        let node = self
            .workflow
            .find_by_activity_id(activity_id)
            .cloned()
            .ok_or_else(|| self.resume_mismatch(activity_id))?;

        if let Some(existing) = self
            .instances
            .iter()
            .rev()
            .find(|i| i.node_id == node.node_id() && !i.status.is_terminal())
            .map(|i| i.id)
        {
            self.log(existing, ExecutionEvent::Resumed);
            self.schedule(existing, None);
            return Ok(existing);
        }

        let parent = match node.parent_node_id() {
            Some(parent_node_id) => Some(
                self.instances
                    .iter()
                    .rev()
                    .find(|i| i.node_id == parent_node_id)
                    .map(|i| i.id)
                    .ok_or_else(|| self.resume_mismatch(activity_id))?,
            ),
            None => None,
        };

        let id = self.create_instance(&node, parent, BTreeMap::new());
        if parent.is_none() {
            self.root = Some(id);
        }
        self.schedule(id, None);
        Ok(id)
    }

    fn resume_mismatch(&self, target: &str) -> RunnerError {
        RunnerError::ResumeMismatch {
            instance_id: self.id.clone(),
            target: target.to_string(),
        }
    }

    pub(crate) fn resumed_bookmark(&self) -> Option<&Bookmark> {
        self.resumed_bookmark.as_ref()
    }

    pub(crate) fn clear_resumed_bookmark(&mut self, target: InstanceId) {
        if self
            .resumed_bookmark
            .as_ref()
            .is_some_and(|bookmark| bookmark.activity_instance_id == target)
        {
            self.resumed_bookmark = None;
        }
    }

    // ========================================================================
    // Completion and faults
    // ========================================================================

    pub(crate) fn request_completion(&mut self, id: InstanceId) {
        self.transitions.push_back(Transition::Complete(id));
    }

    pub(crate) fn pop_transition(&mut self) -> Option<Transition> {
        self.transitions.pop_front()
    }

    /// Mark an instance completed and drop its bookmarks
    ///
    /// Returns false when the instance was already terminal.
    pub(crate) fn complete_now(&mut self, id: InstanceId) -> bool {
        let Some(instance) = self.instance_mut(id) else {
            return false;
        };
        if instance.status.is_terminal() {
            return false;
        }
        instance.status = ActivityStatus::Completed;
        self.clear_bookmarks(id);
        self.log(id, ExecutionEvent::Completed);
        true
    }

    /// Fault an instance and give its ancestors a chance to handle it
    ///
    /// A handled fault is reported to the owner like a completion. An
    /// unhandled one (or any fault that is not an execution fault) faults
    /// the whole run.
    pub(crate) fn fault_instance(&mut self, id: InstanceId, kind: FaultKind, message: String) {
        let Some(instance) = self.instance_mut(id) else {
            return;
        };
        instance.status = ActivityStatus::Faulted;
        instance.fault = Some(message.clone());
        let node_id = instance.node_id.clone();
        self.clear_bookmarks(id);
        self.log(id, ExecutionEvent::Faulted);

        warn!(instance_id = %self.id, %node_id, ?kind, error = %message, "activity faulted");

        if kind == FaultKind::Execution {
            let handled = self.raise_signal(id, &Signal::fault(&message, &node_id));
            if handled {
                debug!(instance_id = %self.id, %node_id, "fault handled by an ancestor");
                self.transitions.push_back(Transition::Faulted(id));
                return;
            }
        }

        self.set_fault(WorkflowFault::new(kind, message).at(id, node_id));
    }

    /// Cancel an instance and every non-terminal descendant
    ///
    /// Their bookmarks and queued work are dropped. Nobody is notified.
    pub(crate) fn cancel_instance(&mut self, id: InstanceId) {
        let mut subtree = HashSet::new();
        let mut canceled = Vec::new();
        let mut stack = vec![id];

        while let Some(current) = stack.pop() {
            let Some(instance) = self.instances.get_mut(current.index()) else {
                continue;
            };
            if !instance.status.is_terminal() {
                instance.status = ActivityStatus::Canceled;
                canceled.push(current);
            }
            subtree.insert(current);
            stack.extend(instance.children.iter().copied());
        }

        self.bookmarks
            .retain(|bookmark| !subtree.contains(&bookmark.activity_instance_id));
        self.work_queue.remove_targets(&subtree);
        self.transitions
            .retain(|transition| !subtree.contains(&transition.instance()));

        canceled.sort();
        for current in canceled {
            self.log(current, ExecutionEvent::Canceled);
        }
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    pub(crate) fn register_bookmark(&mut self, bookmark: Bookmark) {
        debug!(
            instance_id = %self.id,
            bookmark_id = %bookmark.id,
            payload_hash = %bookmark.payload_hash,
            "bookmark created"
        );
        self.bookmarks.push(bookmark);
    }

    pub(crate) fn clear_bookmarks(&mut self, id: InstanceId) -> usize {
        let before = self.bookmarks.len();
        self.bookmarks
            .retain(|bookmark| bookmark.activity_instance_id != id);
        before - self.bookmarks.len()
    }

    pub(crate) fn has_bookmarks(&self, id: InstanceId) -> bool {
        self.bookmarks
            .iter()
            .any(|bookmark| bookmark.activity_instance_id == id)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Deliver a signal to every ancestor of `origin`, nearest first
    ///
    /// At each ancestor the activity observes the signal before its
    /// behaviors, in attachment order. Returns whether any observer marked
    /// the signal handled.
    pub(crate) fn raise_signal(&mut self, origin: InstanceId, signal: &Signal) -> bool {
        let mut handled = false;
        let mut current = self.instance(origin).and_then(|instance| instance.parent);

        while let Some(ancestor) = current {
            let Some(node) = self.node_for(ancestor) else {
                break;
            };

            let mut ctx = SignalContext::new(self, origin, ancestor, handled);
            node.activity().on_signal(signal, &mut ctx);
            for behavior in node.behaviors() {
                behavior.on_signal(signal, &mut ctx);
            }
            handled = ctx.is_handled();

            current = self.instance(ancestor).and_then(|instance| instance.parent);
        }

        debug!(
            instance_id = %self.id,
            signal_type = %signal.signal_type,
            origin = %origin,
            handled,
            "signal propagated"
        );
        handled
    }
}

impl std::fmt::Debug for WorkflowExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutionContext")
            .field("id", &self.id)
            .field("definition_id", &self.workflow.definition_id())
            .field("status", &self.status)
            .field("sub_status", &self.sub_status)
            .field("instances", &self.instances.len())
            .field("pending_work", &self.work_queue.len())
            .field("bookmarks", &self.bookmarks.len())
            .finish()
    }
}
