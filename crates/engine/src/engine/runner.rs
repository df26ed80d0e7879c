//! Workflow runner: the entry point that runs one workflow instance once

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::commit::CommitStateHandler;
use super::context::WorkflowExecutionContext;
use super::notifications::{NoopPublisher, NotificationPublisher, WorkflowNotification};
use super::pipeline::{ExecutionPipeline, PipelineError};
use crate::config::EngineConfig;
use crate::workflow::{
    Bookmark, ExpressionEvaluator, FaultKind, NoExpressionEvaluator, Workflow, WorkflowFault,
    WorkflowState, WorkflowStatus,
};

/// Errors that prevent a run from producing a result
///
/// Activity faults are not errors: they are reported in the
/// [`RunResult`]'s state.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The bookmark or activity to resume is not part of the instance
    #[error("resume target {target} not found in workflow instance {instance_id}")]
    ResumeMismatch { instance_id: String, target: String },

    /// The instance already finished or faulted and accepts no more work
    #[error("workflow instance {instance_id} is {status} and cannot be resumed")]
    InstanceClosed {
        instance_id: String,
        status: WorkflowStatus,
    },

    /// The persisted state was not produced by this definition
    #[error("workflow instance {instance_id} does not match its definition: {reason}")]
    DefinitionMismatch { instance_id: String, reason: String },

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Where a persisted instance resumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeFrom {
    /// Consume a bookmark and re-run the instance that created it
    Bookmark(String),

    /// Schedule an activity by the id it was given in the definition
    Activity(String),
}

/// Options for a single run
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Id of a new instance; generated when absent
    pub instance_id: Option<String>,
    /// Correlation id of a new instance, or a replacement for the persisted
    /// one when resuming
    pub correlation_id: Option<String>,
    /// Input visible to activities during this run only
    pub input: BTreeMap<String, serde_json::Value>,
    pub cancellation: CancellationToken,
    /// Receives the snapshots requested by commit strategies; without one
    /// commit strategies are ignored
    pub commit_handler: Option<Arc<dyn CommitStateHandler>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.input.insert(name.into(), value);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_commit_handler(mut self, commit_handler: Arc<dyn CommitStateHandler>) -> Self {
        self.commit_handler = Some(commit_handler);
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("instance_id", &self.instance_id)
            .field("correlation_id", &self.correlation_id)
            .field("input", &self.input)
            .field("commit_handler", &self.commit_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub workflow_state: WorkflowState,
    /// Value of the workflow's result variable, if it declares one
    pub output: Option<serde_json::Value>,
}

impl RunResult {
    pub fn status(&self) -> WorkflowStatus {
        self.workflow_state.status
    }

    pub fn instance_id(&self) -> &str {
        &self.workflow_state.id
    }

    pub fn fault(&self) -> Option<&WorkflowFault> {
        self.workflow_state.fault.as_ref()
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.workflow_state.bookmarks
    }
}

/// Runs workflows through the execution pipeline
///
/// The runner holds no per-instance state; one runner can drive any number
/// of instances concurrently.
#[derive(Clone)]
pub struct WorkflowRunner {
    pipeline: ExecutionPipeline,
    publisher: Arc<dyn NotificationPublisher>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    config: EngineConfig,
}

impl WorkflowRunner {
    pub fn new() -> Self {
        Self {
            pipeline: ExecutionPipeline::default(),
            publisher: Arc::new(NoopPublisher),
            evaluator: Arc::new(NoExpressionEvaluator),
            config: EngineConfig::default(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: ExecutionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new instance of `workflow` at its root
    #[instrument(skip(self, workflow, options), fields(definition_id = %workflow.definition_id()))]
    pub async fn run_new(
        &self,
        workflow: Arc<Workflow>,
        options: RunOptions,
    ) -> Result<RunResult, RunnerError> {
        let instance_id = options
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut context =
            WorkflowExecutionContext::new(Arc::clone(&workflow), instance_id, options.correlation_id.clone());
        context = self.prepare(context, options);

        if let Err(error) = workflow.validate() {
            context.reject(WorkflowFault::new(FaultKind::Validation, error.to_string()));
            return Ok(Self::result(&context));
        }

        context.schedule_root();
        self.run(context).await
    }

    /// Resume a persisted instance
    ///
    /// Finished and faulted instances are rejected untouched, even when a
    /// faulted one still holds bookmarks.
    #[instrument(skip(self, workflow, state, options), fields(instance_id = %state.id))]
    pub async fn run_from_state(
        &self,
        workflow: Arc<Workflow>,
        mut state: WorkflowState,
        resume: ResumeFrom,
        options: RunOptions,
    ) -> Result<RunResult, RunnerError> {
        if matches!(state.status, WorkflowStatus::Finished | WorkflowStatus::Faulted) {
            return Err(RunnerError::InstanceClosed {
                instance_id: state.id,
                status: state.status,
            });
        }
        if let Some(correlation_id) = options.correlation_id.clone() {
            state.correlation_id = Some(correlation_id);
        }

        let context = WorkflowExecutionContext::from_state(Arc::clone(&workflow), state)?;
        let mut context = self.prepare(context, options);

        if let Err(error) = workflow.validate() {
            context.reject(WorkflowFault::new(FaultKind::Validation, error.to_string()));
            return Ok(Self::result(&context));
        }

        match &resume {
            ResumeFrom::Bookmark(bookmark_id) => context.schedule_bookmark(bookmark_id)?,
            ResumeFrom::Activity(activity_id) => context.schedule_activity(activity_id)?,
        };

        self.run(context).await
    }

    fn prepare(&self, context: WorkflowExecutionContext, options: RunOptions) -> WorkflowExecutionContext {
        context
            .with_input(options.input)
            .with_evaluator(Arc::clone(&self.evaluator))
            .with_config(self.config.clone())
            .with_cancellation(options.cancellation)
            .with_commit_handler(options.commit_handler)
    }

    async fn run(&self, mut context: WorkflowExecutionContext) -> Result<RunResult, RunnerError> {
        let existing: HashSet<String> = context
            .bookmarks()
            .iter()
            .map(|bookmark| bookmark.id.clone())
            .collect();

        self.publisher
            .publish(WorkflowNotification::WorkflowExecuting {
                instance_id: context.id().to_string(),
                definition_id: context.workflow().definition_id().to_string(),
                definition_version: context.workflow().version(),
            })
            .await;

        self.pipeline.execute(&mut context).await?;

        let result = Self::result(&context);

        let payload_hashes: Vec<String> = result
            .bookmarks()
            .iter()
            .filter(|bookmark| !existing.contains(&bookmark.id))
            .map(|bookmark| bookmark.payload_hash.clone())
            .collect();
        if !payload_hashes.is_empty() {
            self.publisher
                .publish(WorkflowNotification::BookmarksCreated {
                    instance_id: result.instance_id().to_string(),
                    payload_hashes,
                })
                .await;
        }

        self.publisher
            .publish(WorkflowNotification::WorkflowExecuted {
                instance_id: result.instance_id().to_string(),
                definition_id: result.workflow_state.definition_id.clone(),
                status: result.status(),
                bookmarks: result.bookmarks().len(),
            })
            .await;

        info!(
            instance_id = %result.instance_id(),
            status = %result.status(),
            "workflow executed"
        );
        Ok(result)
    }

    fn result(context: &WorkflowExecutionContext) -> RunResult {
        let workflow_state = context.to_state();
        RunResult {
            output: workflow_state.result.clone(),
            workflow_state,
        }
    }
}

impl Default for WorkflowRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .finish()
    }
}
