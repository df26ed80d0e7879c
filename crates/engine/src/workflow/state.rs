//! Runtime and persisted state of a workflow instance
//!
//! Every activity instance of a run lives in one arena (`Vec<ActivityInstance>`)
//! owned by the execution context. Parent and child links are [`InstanceId`]s
//! into that arena, so a [`WorkflowState`] snapshot serializes as a plain
//! document and rehydrates with the same tree shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::scheduler::{Continuation, WorkItem};
use crate::workflow::bookmark::Bookmark;
use crate::workflow::memory::MemoryRegister;

/// Index of an activity instance inside the run's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u32);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a single activity instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Scheduled but not yet popped from the work queue
    Pending,

    /// Executed at least once and not finished (may be waiting on a bookmark)
    Running,

    Completed,

    Faulted,

    Canceled,
}

impl ActivityStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted | Self::Canceled)
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Faulted => write!(f, "faulted"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Value stored in an activity instance's private property bag
///
/// The set of kinds is closed so that property bags always persist without
/// type registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Arbitrary structured data
    Structured(serde_json::Value),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Convert to a JSON value regardless of kind
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Float(value) => serde_json::Value::from(*value),
            Self::String(value) => serde_json::Value::String(value.clone()),
            Self::Structured(value) => value.clone(),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Runtime record of one scheduled occurrence of an activity node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInstance {
    pub id: InstanceId,
    pub node_id: String,
    pub activity_type: String,
    pub version: i32,
    pub status: ActivityStatus,
    pub parent: Option<InstanceId>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub children: Vec<InstanceId>,
    /// Routine to run on the owner when this instance finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Continuation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl ActivityInstance {
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// A run loop is draining (or was interrupted while draining) the work queue
    Running,

    /// Waiting on at least one bookmark
    Suspended,

    /// The root instance reached a terminal status
    Finished,

    Faulted,

    Canceled,
}

impl WorkflowStatus {
    /// Finished, faulted and canceled instances never run again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Faulted | Self::Canceled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Finished => write!(f, "finished"),
            Self::Faulted => write!(f, "faulted"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Finer-grained phase of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowSubStatus {
    Pending,
    Executing,
    Idle,
}

impl std::fmt::Display for WorkflowSubStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Category of a workflow-level fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The definition or an activity's configuration was rejected before execution
    Validation,

    /// An activity returned an error that no ancestor handled
    Execution,

    /// An activity reported it was waiting without creating a bookmark or scheduling work
    SuspensionWithoutBookmark,

    /// The queue drained with neither a finished root nor any bookmark
    Stalled,

    /// The run exceeded the configured number of work items
    TickBudgetExceeded,

    /// A commit requested by a commit strategy failed
    Commit,
}

/// Fault recorded on a workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFault {
    pub kind: FaultKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl WorkflowFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            instance_id: None,
            node_id: None,
        }
    }

    /// Attach the activity instance the fault originated from
    pub fn at(mut self, instance_id: InstanceId, node_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id);
        self.node_id = Some(node_id.into());
        self
    }
}

impl std::fmt::Display for WorkflowFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "{:?} at {}: {}", self.kind, node_id, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Step recorded in the execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEvent {
    Scheduled,
    Started,
    /// `can_execute` returned false; the instance completed without executing
    Skipped,
    Completed,
    Suspended,
    Resumed,
    Faulted,
    Canceled,
}

/// One entry of the execution log
///
/// Entries carry no timestamps: identical runs produce identical logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub sequence: u64,
    pub instance_id: InstanceId,
    pub node_id: String,
    pub activity_type: String,
    pub event: ExecutionEvent,
}

/// Persisted snapshot of a workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub definition_id: String,
    pub definition_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub status: WorkflowStatus,
    pub sub_status: WorkflowSubStatus,
    pub root: Option<InstanceId>,
    pub activity_instances: Vec<ActivityInstance>,
    /// Work items left in the queue; only non-empty for canceled or faulted runs
    #[serde(default)]
    pub scheduled: Vec<WorkItem>,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    #[serde(default)]
    pub memory: MemoryRegister,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<WorkflowFault>,
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn instance(&self, id: InstanceId) -> Option<&ActivityInstance> {
        self.activity_instances.get(id.index())
    }

    /// All instances created for the given node id, in creation order
    pub fn instances_of<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a ActivityInstance> {
        self.activity_instances
            .iter()
            .filter(move |instance| instance.node_id == node_id)
    }

    pub fn find_bookmark(&self, bookmark_id: &str) -> Option<&Bookmark> {
        self.bookmarks.iter().find(|bookmark| bookmark.id == bookmark_id)
    }
}
