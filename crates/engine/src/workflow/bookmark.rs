//! Bookmarks: named suspension points that external events resume

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::workflow::state::InstanceId;

/// Hash identifying the event a bookmark waits for
///
/// Computed as the upper-case hex SHA-256 of `"{activity_type}:{payload}"`
/// where the payload is rendered as compact JSON with sorted object keys.
/// External triggers compute the same hash to find matching bookmarks.
pub fn payload_hash(activity_type: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(activity_type.as_bytes());
    hasher.update(b":");
    hasher.update(payload.to_string().as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// A suspension point created by an activity instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub activity_instance_id: InstanceId,
    pub activity_node_id: String,
    pub activity_type: String,
    pub payload_hash: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(
        activity_instance_id: InstanceId,
        activity_node_id: impl Into<String>,
        activity_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let activity_type = activity_type.into();
        Self {
            id: Uuid::now_v7().to_string(),
            activity_instance_id,
            activity_node_id: activity_node_id.into(),
            payload_hash: payload_hash(&activity_type, &payload),
            activity_type,
            payload,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn matches(&self, hash: &str) -> bool {
        self.payload_hash == hash
    }
}
