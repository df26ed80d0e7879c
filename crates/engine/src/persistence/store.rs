//! WorkflowStateStore trait definition

use async_trait::async_trait;

use crate::workflow::{InstanceId, WorkflowState, WorkflowStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Filter for counting instances that have not finished
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountRunningFilter {
    pub definition_id: Option<String>,
    pub version: Option<i32>,
    pub correlation_id: Option<String>,
}

impl CountRunningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition_id(mut self, definition_id: impl Into<String>) -> Self {
        self.definition_id = Some(definition_id.into());
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Whether a state counts: running or suspended, and matching every set field
    pub fn matches(&self, state: &WorkflowState) -> bool {
        matches!(
            state.status,
            WorkflowStatus::Running | WorkflowStatus::Suspended
        ) && self
            .definition_id
            .as_ref()
            .map_or(true, |id| *id == state.definition_id)
            && self
                .version
                .map_or(true, |version| version == state.definition_version)
            && self
                .correlation_id
                .as_ref()
                .map_or(true, |id| state.correlation_id.as_ref() == Some(id))
    }
}

/// A persisted bookmark that matched a payload hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkMatch {
    pub instance_id: String,
    pub bookmark_id: String,
    pub activity_instance_id: InstanceId,
    pub payload_hash: String,
}

/// Storage for workflow state snapshots
///
/// Implementations must round-trip states exactly: `load` after `save`
/// returns an equal [`WorkflowState`].
#[async_trait]
pub trait WorkflowStateStore: Send + Sync + 'static {
    /// Insert or replace the snapshot of an instance
    async fn save(&self, instance_id: &str, state: &WorkflowState) -> Result<(), StoreError>;

    async fn load(&self, instance_id: &str) -> Result<Option<WorkflowState>, StoreError>;

    /// Count running and suspended instances matching the filter
    async fn count_running(&self, filter: &CountRunningFilter) -> Result<u64, StoreError>;

    /// Find bookmarks of running and suspended instances with the given
    /// payload hash, ordered by instance id then bookmark id
    async fn find_bookmarks(&self, payload_hash: &str) -> Result<Vec<BookmarkMatch>, StoreError>;

    /// Remove an instance; returns whether it existed
    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError>;
}
