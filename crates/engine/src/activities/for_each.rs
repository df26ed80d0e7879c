//! Iterates a list, running the body once per item

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::activity::{
    Activity, ActivityError, ActivityNode, Behavior, BreakBehavior, ChildCompletion,
    ExecutionOutcome,
};
use crate::engine::{ActivityExecutionContext, ScheduleOptions};
use crate::workflow::PropertyValue;

const ITERATE: &str = "iterate";
const SNAPSHOT: &str = "items";

/// Runs its `body` child once per element of the `items` input, one
/// iteration at a time
///
/// The items are resolved once when the loop starts. Each iteration writes
/// the element to the `current_value` output (when bound) and hands the
/// body instance `current_index` and `current_value` properties. A `break`
/// signal from the body ends the loop after the current iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForEach;

impl ForEach {
    pub const ITEMS: &'static str = "items";
    pub const BODY: &'static str = "body";
    pub const CURRENT_VALUE: &'static str = "current_value";
    pub const CURRENT_INDEX: &'static str = "current_index";
}

fn next_iteration(
    ctx: &mut ActivityExecutionContext<'_>,
) -> Result<ExecutionOutcome, ActivityError> {
    let body = ctx.port(ForEach::BODY).first().cloned();

    loop {
        let index = ctx
            .property(ForEach::CURRENT_INDEX)
            .and_then(PropertyValue::as_i64)
            .and_then(|index| usize::try_from(index).ok())
            .unwrap_or(0);

        let item = match ctx.property(SNAPSHOT) {
            Some(PropertyValue::Structured(Value::Array(items))) => items.get(index).cloned(),
            _ => None,
        };
        let Some(item) = item else {
            return Ok(ExecutionOutcome::Completed);
        };

        ctx.set_output(ForEach::CURRENT_VALUE, item.clone());
        ctx.set_property(ForEach::CURRENT_INDEX, (index + 1) as i64);

        // Without a body every iteration is empty
        let Some(body) = body.as_deref() else {
            continue;
        };

        let options = ScheduleOptions::new()
            .with_callback(ITERATE)
            .with_property(ForEach::CURRENT_INDEX, index as i64)
            .with_property(ForEach::CURRENT_VALUE, item);
        ctx.schedule_activity(body, options)?;
        return Ok(ExecutionOutcome::Running);
    }
}

#[async_trait]
impl Activity for ForEach {
    fn activity_type(&self) -> &str {
        "ForEach"
    }

    fn default_behaviors(&self) -> Vec<Arc<dyn Behavior>> {
        vec![Arc::new(BreakBehavior)]
    }

    fn validate(&self, node: &ActivityNode) -> Result<(), String> {
        if node.input(Self::ITEMS).is_none() {
            return Err("missing `items` input".to_string());
        }
        if node.port(Self::BODY).len() > 1 {
            return Err("`body` port takes a single activity".to_string());
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let items = match ctx.input(Self::ITEMS)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(ActivityError::new(format!("items must be a list, got {other}"))
                    .with_type("validation"))
            }
        };

        ctx.set_property(SNAPSHOT, Value::Array(items));
        ctx.set_property(Self::CURRENT_INDEX, 0i64);
        next_iteration(ctx)
    }

    async fn on_child_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
        child: &ChildCompletion,
    ) -> Result<(), ActivityError> {
        if child.callback != ITERATE {
            return Ok(());
        }

        if ctx.is_breaking() || next_iteration(ctx)? == ExecutionOutcome::Completed {
            ctx.complete();
        }
        Ok(())
    }
}
