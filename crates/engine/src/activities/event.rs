//! Waits for a named external event

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::{Activity, ActivityError, ActivityNode, ExecutionOutcome};
use crate::engine::ActivityExecutionContext;
use crate::workflow::payload_hash;

/// Suspends on a bookmark keyed by the event name
///
/// Triggering the event resumes the bookmark; the run input of the resuming
/// run is written to the `payload` output and the activity completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Event;

impl Event {
    pub const TYPE: &'static str = "Event";
    pub const NAME: &'static str = "name";
    pub const PAYLOAD: &'static str = "payload";

    /// Bookmark payload for an event name
    pub fn payload(name: &str) -> Value {
        json!({ "name": name })
    }

    /// Payload hash that triggers bookmarks waiting on `name`
    pub fn hash(name: &str) -> String {
        payload_hash(Self::TYPE, &Self::payload(name))
    }
}

#[async_trait]
impl Activity for Event {
    fn activity_type(&self) -> &str {
        Self::TYPE
    }

    fn validate(&self, node: &ActivityNode) -> Result<(), String> {
        match node.input(Self::NAME) {
            Some(_) => Ok(()),
            None => Err("missing `name` input".to_string()),
        }
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        if ctx.resumed_bookmark().is_some() {
            let input: serde_json::Map<String, Value> = ctx
                .workflow_inputs()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            ctx.set_output(Self::PAYLOAD, Value::Object(input));
            return Ok(ExecutionOutcome::Completed);
        }

        let name: String = ctx.input_as(Self::NAME)?;
        ctx.create_bookmark(Self::payload(&name));
        Ok(ExecutionOutcome::Suspended)
    }
}
