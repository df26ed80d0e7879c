//! Runs children one after another

use async_trait::async_trait;

use crate::activity::{Activity, ActivityError, ChildCompletion, ExecutionOutcome};
use crate::engine::{ActivityExecutionContext, ScheduleOptions};
use crate::workflow::PropertyValue;

const CURRENT_INDEX: &str = "current_index";
const NEXT: &str = "next";

/// Executes the children of its port in order, each after the previous one
/// finished
///
/// Stops early when it or an enclosing loop is breaking.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequence;

impl Sequence {
    pub const PORT: &'static str = "activities";
}

fn schedule_next(ctx: &mut ActivityExecutionContext<'_>) -> Result<ExecutionOutcome, ActivityError> {
    let index = ctx
        .property(CURRENT_INDEX)
        .and_then(PropertyValue::as_i64)
        .and_then(|index| usize::try_from(index).ok())
        .unwrap_or(0);

    let Some(node_id) = ctx.port(Sequence::PORT).get(index).cloned() else {
        return Ok(ExecutionOutcome::Completed);
    };

    ctx.set_property(CURRENT_INDEX, (index + 1) as i64);
    ctx.schedule_activity(&node_id, ScheduleOptions::new().with_callback(NEXT))?;
    Ok(ExecutionOutcome::Running)
}

#[async_trait]
impl Activity for Sequence {
    fn activity_type(&self) -> &str {
        "Sequence"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        schedule_next(ctx)
    }

    async fn on_child_completed(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
        child: &ChildCompletion,
    ) -> Result<(), ActivityError> {
        if child.callback != NEXT {
            return Ok(());
        }

        if ctx.is_breaking_in_scope() || schedule_next(ctx)? == ExecutionOutcome::Completed {
            ctx.complete();
        }
        Ok(())
    }
}
