//! Workflow runtime: registry, runner and store working together
//!
//! The runtime loads state before a run and saves it afterwards, and makes
//! sure only one run loop advances a given instance at a time within the
//! process.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::commit::{CommitStateHandler, StoreCommitHandler};
use super::registry::{RegistryError, WorkflowRegistry};
use super::runner::{ResumeFrom, RunOptions, RunResult, RunnerError, WorkflowRunner};
use crate::persistence::{CountRunningFilter, StoreError, WorkflowStateStore};
use crate::workflow::payload_hash;

/// Errors from runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Runner error
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    /// No persisted state for the instance
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// A new instance was requested with an id already in the store
    #[error("workflow instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// Another run loop is advancing the instance
    #[error("workflow instance {0} is already running")]
    InstanceBusy(String),
}

/// Removes the instance from the active set when dropped
struct Lease<'a> {
    active: &'a DashMap<String, ()>,
    instance_id: String,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.instance_id);
    }
}

/// Runs registered workflows against a state store
///
/// # Example
///
/// ```ignore
/// let mut registry = WorkflowRegistry::new();
/// registry.register(approval_workflow()?);
///
/// let runtime = WorkflowRuntime::new(InMemoryWorkflowStateStore::new(), registry);
/// let started = runtime.start("approval", RunOptions::new()).await?;
/// runtime.trigger("Event", &Event::payload("approved"), RunOptions::new()).await?;
/// ```
pub struct WorkflowRuntime<S: WorkflowStateStore> {
    store: Arc<S>,
    registry: WorkflowRegistry,
    runner: WorkflowRunner,
    active: DashMap<String, ()>,
}

impl<S: WorkflowStateStore> WorkflowRuntime<S> {
    /// Create a runtime with the default runner
    pub fn new(store: S, registry: WorkflowRegistry) -> Self {
        Self::with_store(Arc::new(store), registry)
    }

    /// Create a runtime around a shared store
    pub fn with_store(store: Arc<S>, registry: WorkflowRegistry) -> Self {
        Self {
            store,
            registry,
            runner: WorkflowRunner::new(),
            active: DashMap::new(),
        }
    }

    pub fn with_runner(mut self, runner: WorkflowRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Get a reference to the store
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &WorkflowRunner {
        &self.runner
    }

    /// Whether a run loop currently holds the instance
    pub fn is_active(&self, instance_id: &str) -> bool {
        self.active.contains_key(instance_id)
    }

    /// Commits requested by commit strategies go to the runtime's store
    fn store_commits(&self, options: &mut RunOptions) {
        options.commit_handler.get_or_insert_with(|| {
            Arc::new(StoreCommitHandler::new(Arc::clone(&self.store))) as Arc<dyn CommitStateHandler>
        });
    }

    fn acquire(&self, instance_id: &str) -> Result<Lease<'_>, RuntimeError> {
        match self.active.entry(instance_id.to_string()) {
            Entry::Occupied(_) => Err(RuntimeError::InstanceBusy(instance_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(Lease {
                    active: &self.active,
                    instance_id: instance_id.to_string(),
                })
            }
        }
    }

    /// Start a new instance of the latest version of a definition and save it
    #[instrument(skip(self, options))]
    pub async fn start(
        &self,
        definition_id: &str,
        mut options: RunOptions,
    ) -> Result<RunResult, RuntimeError> {
        let workflow = self.registry.latest(definition_id)?;
        let instance_id = options
            .instance_id
            .get_or_insert_with(|| Uuid::now_v7().to_string())
            .clone();

        let _lease = self.acquire(&instance_id)?;
        if self.store.load(&instance_id).await?.is_some() {
            return Err(RuntimeError::InstanceAlreadyExists(instance_id));
        }
        self.store_commits(&mut options);

        let result = self.runner.run_new(workflow, options).await?;
        self.store.save(&instance_id, &result.workflow_state).await?;

        info!(%instance_id, status = %result.status(), "workflow instance started");
        Ok(result)
    }

    /// Resume a persisted instance and save the new state
    #[instrument(skip(self, options))]
    pub async fn resume(
        &self,
        instance_id: &str,
        resume: ResumeFrom,
        mut options: RunOptions,
    ) -> Result<RunResult, RuntimeError> {
        let _lease = self.acquire(instance_id)?;
        self.store_commits(&mut options);

        let state = self
            .store
            .load(instance_id)
            .await?
            .ok_or_else(|| RuntimeError::InstanceNotFound(instance_id.to_string()))?;
        let workflow = self
            .registry
            .get(&state.definition_id, state.definition_version)?;

        let result = self
            .runner
            .run_from_state(workflow, state, resume, options)
            .await?;
        self.store.save(instance_id, &result.workflow_state).await?;

        info!(%instance_id, status = %result.status(), "workflow instance resumed");
        Ok(result)
    }

    /// Resume every persisted bookmark waiting for this event
    ///
    /// Instances that are busy, closed or no longer hold the bookmark are
    /// skipped with a warning; other errors abort the trigger.
    #[instrument(skip(self, payload, options))]
    pub async fn trigger(
        &self,
        activity_type: &str,
        payload: &serde_json::Value,
        options: RunOptions,
    ) -> Result<Vec<RunResult>, RuntimeError> {
        let hash = payload_hash(activity_type, payload);
        let matches = self.store.find_bookmarks(&hash).await?;
        info!(payload_hash = %hash, matches = matches.len(), "triggering bookmarks");

        let mut results = Vec::with_capacity(matches.len());
        for bookmark in matches {
            let resumed = self
                .resume(
                    &bookmark.instance_id,
                    ResumeFrom::Bookmark(bookmark.bookmark_id.clone()),
                    options.clone(),
                )
                .await;

            match resumed {
                Ok(result) => results.push(result),
                Err(RuntimeError::InstanceBusy(instance_id))
                | Err(RuntimeError::Runner(RunnerError::ResumeMismatch { instance_id, .. }))
                | Err(RuntimeError::Runner(RunnerError::InstanceClosed { instance_id, .. })) => {
                    warn!(
                        %instance_id,
                        bookmark_id = %bookmark.bookmark_id,
                        "skipping bookmark that can no longer be resumed"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Count running and suspended instances in the store
    pub async fn count_running(&self, filter: &CountRunningFilter) -> Result<u64, RuntimeError> {
        Ok(self.store.count_running(filter).await?)
    }
}

impl<S: WorkflowStateStore> std::fmt::Debug for WorkflowRuntime<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRuntime")
            .field("registry", &self.registry)
            .field("runner", &self.runner)
            .field("active", &self.active.len())
            .finish()
    }
}
