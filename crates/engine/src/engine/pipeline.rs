//! Execution pipeline: middleware wrapped around the run loop

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, info_span, Instrument};

use super::context::WorkflowExecutionContext;
use super::executor::run_workflow;

/// Error raised by a pipeline middleware
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("middleware {name} failed: {message}")]
    Middleware { name: String, message: String },
}

impl PipelineError {
    pub fn middleware(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// A step wrapped around the run loop
///
/// Implementations do their work and call `next.run(context)` to continue
/// the chain; skipping the call skips the run loop.
#[async_trait]
pub trait PipelineMiddleware: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        context: &mut WorkflowExecutionContext,
        next: Next<'_>,
    ) -> Result<(), PipelineError>;
}

/// The rest of the middleware chain, ending in the run loop
pub struct Next<'a> {
    remaining: &'a [Arc<dyn PipelineMiddleware>],
}

impl<'a> Next<'a> {
    pub async fn run(self, context: &mut WorkflowExecutionContext) -> Result<(), PipelineError> {
        match self.remaining.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .invoke(context, Next { remaining: rest })
                    .await
            }
            None => {
                run_workflow(context).await;
                Ok(())
            }
        }
    }
}

/// Ordered middleware chain
#[derive(Clone)]
pub struct ExecutionPipeline {
    middlewares: Vec<Arc<dyn PipelineMiddleware>>,
}

impl ExecutionPipeline {
    /// A pipeline that runs the loop with no middleware
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware; earlier middleware wraps later ones
    pub fn with(mut self, middleware: impl PipelineMiddleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub async fn execute(&self, context: &mut WorkflowExecutionContext) -> Result<(), PipelineError> {
        Next {
            remaining: &self.middlewares,
        }
        .run(context)
        .await
    }
}

impl Default for ExecutionPipeline {
    /// Run loop wrapped in [`TracingMiddleware`]
    fn default() -> Self {
        Self::new().with(TracingMiddleware)
    }
}

impl std::fmt::Debug for ExecutionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|m| m.name()))
            .finish()
    }
}

/// Runs the rest of the pipeline inside a span and logs the outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl PipelineMiddleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn invoke(
        &self,
        context: &mut WorkflowExecutionContext,
        next: Next<'_>,
    ) -> Result<(), PipelineError> {
        let span = info_span!(
            "workflow_run",
            instance_id = %context.id(),
            definition_id = %context.workflow().definition_id(),
            version = context.workflow().version(),
        );
        let started = Instant::now();

        next.run(context).instrument(span).await?;

        info!(
            instance_id = %context.id(),
            status = %context.status(),
            bookmarks = context.bookmarks().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workflow run finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::SetVariable;
    use crate::activity::NodeBuilder;
    use crate::engine::{RunOptions, RunnerError, WorkflowRunner};
    use crate::workflow::{Input, Workflow, WorkflowStatus};
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PipelineMiddleware for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn invoke(
            &self,
            context: &mut WorkflowExecutionContext,
            next: Next<'_>,
        ) -> Result<(), PipelineError> {
            self.calls.lock().push(format!("{}:before", self.name));
            next.run(context).await?;
            self.calls
                .lock()
                .push(format!("{}:after:{}", self.name, context.status()));
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl PipelineMiddleware for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        async fn invoke(
            &self,
            _context: &mut WorkflowExecutionContext,
            _next: Next<'_>,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::middleware("reject", "not today"))
        }
    }

    fn workflow() -> Arc<Workflow> {
        Arc::new(
            Workflow::new(
                "wf",
                1,
                NodeBuilder::new("root", SetVariable::new("done"))
                    .with_input(SetVariable::VALUE, Input::literal(true)),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_middleware_wraps_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ExecutionPipeline::new()
            .with(Recording {
                name: "outer",
                calls: Arc::clone(&calls),
            })
            .with(Recording {
                name: "inner",
                calls: Arc::clone(&calls),
            });
        assert_eq!(pipeline.len(), 2);

        let result = WorkflowRunner::new()
            .with_pipeline(pipeline)
            .run_new(workflow(), RunOptions::new())
            .await
            .unwrap();

        assert_eq!(result.status(), WorkflowStatus::Finished);
        assert_eq!(
            *calls.lock(),
            vec![
                "outer:before",
                "inner:before",
                "inner:after:finished",
                "outer:after:finished"
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_middleware_skips_run_loop() {
        let result = WorkflowRunner::new()
            .with_pipeline(ExecutionPipeline::new().with(Reject))
            .run_new(workflow(), RunOptions::new())
            .await;

        match result {
            Err(RunnerError::Pipeline(PipelineError::Middleware { name, .. })) => {
                assert_eq!(name, "reject")
            }
            other => panic!("expected pipeline error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_pipeline_traces() {
        let pipeline = ExecutionPipeline::default();
        assert_eq!(format!("{pipeline:?}"), r#"["tracing"]"#);
    }
}
