//! Writes a memory register variable

use async_trait::async_trait;

use crate::activity::{Activity, ActivityError, ExecutionOutcome};
use crate::engine::ActivityExecutionContext;

/// Sets `variable` to the value of the `value` input
#[derive(Debug, Clone)]
pub struct SetVariable {
    variable: String,
}

impl SetVariable {
    pub const VALUE: &'static str = "value";

    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }
}

#[async_trait]
impl Activity for SetVariable {
    fn activity_type(&self) -> &str {
        "SetVariable"
    }

    async fn execute(
        &self,
        ctx: &mut ActivityExecutionContext<'_>,
    ) -> Result<ExecutionOutcome, ActivityError> {
        let value = ctx.input(Self::VALUE)?;
        ctx.set_variable(self.variable.clone(), value);
        Ok(ExecutionOutcome::Completed)
    }
}
