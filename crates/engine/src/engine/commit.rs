//! Commit strategies: persisting a run while it is still in progress
//!
//! By default a run is saved once, after the loop halts. A node (or a whole
//! workflow) can ask for extra commits around its execution so that a crash
//! mid-run loses less work.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::persistence::{StoreError, WorkflowStateStore};
use crate::workflow::WorkflowState;

/// When the state is committed around an activity's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStrategy {
    /// Before the activity executes, once it is marked running
    Executing,

    /// After the activity executed and its completions were reported
    Executed,

    /// Both before and after
    ExecutingAndExecuted,
}

impl CommitStrategy {
    pub fn commits_before(self) -> bool {
        matches!(self, Self::Executing | Self::ExecutingAndExecuted)
    }

    pub fn commits_after(self) -> bool {
        matches!(self, Self::Executed | Self::ExecutingAndExecuted)
    }
}

impl std::fmt::Display for CommitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executing => write!(f, "executing"),
            Self::Executed => write!(f, "executed"),
            Self::ExecutingAndExecuted => write!(f, "executing_and_executed"),
        }
    }
}

/// Receives the snapshots a commit strategy asks for
#[async_trait]
pub trait CommitStateHandler: Send + Sync {
    async fn commit(&self, state: &WorkflowState) -> Result<(), StoreError>;
}

/// Commits snapshots by saving them to a state store
pub struct StoreCommitHandler<S: WorkflowStateStore> {
    store: Arc<S>,
}

impl<S: WorkflowStateStore> StoreCommitHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: WorkflowStateStore> CommitStateHandler for StoreCommitHandler<S> {
    async fn commit(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.store.save(&state.id, state).await
    }
}

impl<S: WorkflowStateStore> std::fmt::Debug for StoreCommitHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCommitHandler").finish_non_exhaustive()
    }
}
