//! FIFO work queue and the continuations carried by work items

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::workflow::state::InstanceId;

/// Routine dispatched to `owner` when the scheduled instance finishes
///
/// Continuations are data, not closures, so they persist with the state and
/// survive a suspend/resume cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub owner: InstanceId,
    /// Tag passed back to the owner's `on_child_completed`
    pub callback: String,
}

/// A pending request to execute an activity instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub target: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Continuation>,
}

impl WorkItem {
    pub fn new(target: InstanceId) -> Self {
        Self {
            target,
            continuation: None,
        }
    }

    pub fn with_continuation(mut self, owner: InstanceId, callback: impl Into<String>) -> Self {
        self.continuation = Some(Continuation {
            owner,
            callback: callback.into(),
        });
        self
    }
}

/// First-in first-out queue of work items
///
/// Items are executed strictly in the order they were pushed, whether or not
/// they carry a continuation.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<WorkItem>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub fn push(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    /// Put an item back at the head of the queue
    pub fn push_front(&mut self, item: WorkItem) {
        self.items.push_front(item);
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, target: InstanceId) -> bool {
        self.items.iter().any(|item| item.target == target)
    }

    /// Drop every item targeting one of the given instances
    pub fn remove_targets(&mut self, targets: &HashSet<InstanceId>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !targets.contains(&item.target));
        before - self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<WorkItem> {
        self.items.iter().cloned().collect()
    }
}
