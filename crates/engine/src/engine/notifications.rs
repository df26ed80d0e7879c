//! Notifications published around each run

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::workflow::WorkflowStatus;

/// Lifecycle notification of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowNotification {
    /// A run is about to drive the pipeline
    WorkflowExecuting {
        instance_id: String,
        definition_id: String,
        definition_version: i32,
    },

    /// A run halted and its state was snapshotted
    WorkflowExecuted {
        instance_id: String,
        definition_id: String,
        status: WorkflowStatus,
        bookmarks: usize,
    },

    /// The run created bookmarks that external triggers can match
    BookmarksCreated {
        instance_id: String,
        payload_hashes: Vec<String>,
    },
}

impl WorkflowNotification {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::WorkflowExecuting { instance_id, .. }
            | Self::WorkflowExecuted { instance_id, .. }
            | Self::BookmarksCreated { instance_id, .. } => instance_id,
        }
    }
}

/// Fire-and-forget sink for notifications
#[async_trait]
pub trait NotificationPublisher: Send + Sync + 'static {
    async fn publish(&self, notification: WorkflowNotification);
}

/// Discards every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl NotificationPublisher for NoopPublisher {
    async fn publish(&self, _notification: WorkflowNotification) {}
}

/// Fans notifications out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<WorkflowNotification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowNotification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationPublisher for BroadcastPublisher {
    async fn publish(&self, notification: WorkflowNotification) {
        // No subscribers is not an error
        if self.sender.send(notification).is_err() {
            debug!("notification dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut receiver = publisher.subscribe();

        publisher
            .publish(WorkflowNotification::WorkflowExecuting {
                instance_id: "wf-1".into(),
                definition_id: "orders".into(),
                definition_version: 1,
            })
            .await;

        let received = receiver.recv().await.expect("should receive notification");
        assert_eq!(received.instance_id(), "wf-1");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        publisher
            .publish(WorkflowNotification::BookmarksCreated {
                instance_id: "wf-1".into(),
                payload_hashes: vec!["AB".into()],
            })
            .await;
    }

    #[test]
    fn test_notification_encoding() {
        let json = serde_json::to_value(WorkflowNotification::WorkflowExecuted {
            instance_id: "wf-1".into(),
            definition_id: "orders".into(),
            status: WorkflowStatus::Suspended,
            bookmarks: 1,
        })
        .unwrap();

        assert_eq!(json["type"], "workflow_executed");
        assert_eq!(json["status"], "suspended");
    }
}
