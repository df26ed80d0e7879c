//! Runs all children at once and joins them

use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::{Activity, ActivityError, Behavior, ExecutionOutcome, JoinBehavior};
use crate::engine::{ActivityExecutionContext, ScheduleOptions};

/// Schedules every branch immediately; completes through [`JoinBehavior`]
/// once all branches are terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl Parallel {
    pub const PORT: &'static str = "branches";
}

#[async_trait]
impl Activity for Parallel {
    fn activity_type(&self) -> &str {
        "Parallel"
    }

    fn default_behaviors(&self) -> Vec<Arc<dyn Behavior>> {
        vec![Arc::new(JoinBehavior)]
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let branches = ctx.schedule_port(Self::PORT, ScheduleOptions::new())?;
        if branches.is_empty() {
            return Ok(ExecutionOutcome::Completed);
        }
        Ok(ExecutionOutcome::Running)
    }
}
