//! In-memory implementation of WorkflowStateStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::store::*;
use crate::workflow::{WorkflowState, WorkflowStatus};

/// Stored snapshot plus the columns the queries filter on
struct StoredState {
    /// Serialized state; every load deserializes a fresh copy
    document: String,
    state: WorkflowState,
}

/// In-memory implementation of WorkflowStateStore
///
/// This is primarily for testing. States are kept as serialized JSON, so a
/// load goes through the same encoding as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use arbor_engine::InMemoryWorkflowStateStore;
///
/// let store = InMemoryWorkflowStateStore::new();
/// assert_eq!(store.instance_count(), 0);
/// ```
pub struct InMemoryWorkflowStateStore {
    states: RwLock<HashMap<String, StoredState>>,
}

impl InMemoryWorkflowStateStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of stored instances
    pub fn instance_count(&self) -> usize {
        self.states.read().len()
    }

    /// Raw JSON document of a stored instance
    pub fn document(&self, instance_id: &str) -> Option<String> {
        self.states
            .read()
            .get(instance_id)
            .map(|stored| stored.document.clone())
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.states.write().clear();
    }
}

impl Default for InMemoryWorkflowStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStateStore for InMemoryWorkflowStateStore {
    async fn save(&self, instance_id: &str, state: &WorkflowState) -> Result<(), StoreError> {
        let document = serde_json::to_string(state)?;
        // Index on what was actually encoded
        let state: WorkflowState = serde_json::from_str(&document)?;

        debug!(%instance_id, status = %state.status, "saving workflow state");
        self.states
            .write()
            .insert(instance_id.to_string(), StoredState { document, state });
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let states = self.states.read();
        match states.get(instance_id) {
            Some(stored) => Ok(Some(serde_json::from_str(&stored.document)?)),
            None => Ok(None),
        }
    }

    async fn count_running(&self, filter: &CountRunningFilter) -> Result<u64, StoreError> {
        let states = self.states.read();
        Ok(states
            .values()
            .filter(|stored| filter.matches(&stored.state))
            .count() as u64)
    }

    async fn find_bookmarks(&self, payload_hash: &str) -> Result<Vec<BookmarkMatch>, StoreError> {
        let states = self.states.read();
        let mut matches: Vec<BookmarkMatch> = states
            .iter()
            .filter(|(_, stored)| {
                matches!(
                    stored.state.status,
                    WorkflowStatus::Running | WorkflowStatus::Suspended
                )
            })
            .flat_map(|(instance_id, stored)| {
                stored
                    .state
                    .bookmarks
                    .iter()
                    .filter(|bookmark| bookmark.matches(payload_hash))
                    .map(move |bookmark| BookmarkMatch {
                        instance_id: instance_id.clone(),
                        bookmark_id: bookmark.id.clone(),
                        activity_instance_id: bookmark.activity_instance_id,
                        payload_hash: bookmark.payload_hash.clone(),
                    })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.instance_id
                .cmp(&b.instance_id)
                .then_with(|| a.bookmark_id.cmp(&b.bookmark_id))
        });
        Ok(matches)
    }

    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError> {
        Ok(self.states.write().remove(instance_id).is_some())
    }
}
