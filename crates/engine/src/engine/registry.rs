//! Registry of workflow definitions
//!
//! Maps a definition id to every registered version of it, so persisted
//! instances are always resumed with the version that created them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::workflow::Workflow;

/// Registry of workflow definitions by id and version
pub struct WorkflowRegistry {
    definitions: HashMap<String, BTreeMap<i32, Arc<Workflow>>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Register a definition, replacing any with the same id and version
    pub fn register(&mut self, workflow: Workflow) -> Arc<Workflow> {
        self.register_arc(Arc::new(workflow))
    }

    pub fn register_arc(&mut self, workflow: Arc<Workflow>) -> Arc<Workflow> {
        info!(
            definition_id = %workflow.definition_id(),
            version = workflow.version(),
            "registered workflow definition"
        );
        self.definitions
            .entry(workflow.definition_id().to_string())
            .or_default()
            .insert(workflow.version(), Arc::clone(&workflow));
        workflow
    }

    /// Check if a definition id is registered
    pub fn contains(&self, definition_id: &str) -> bool {
        self.definitions.contains_key(definition_id)
    }

    /// Get an exact version of a definition
    pub fn get(&self, definition_id: &str, version: i32) -> Result<Arc<Workflow>, RegistryError> {
        self.definitions
            .get(definition_id)
            .ok_or_else(|| RegistryError::UnknownDefinition(definition_id.to_string()))?
            .get(&version)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownVersion {
                definition_id: definition_id.to_string(),
                version,
            })
    }

    /// Get the highest registered version of a definition
    pub fn latest(&self, definition_id: &str) -> Result<Arc<Workflow>, RegistryError> {
        self.definitions
            .get(definition_id)
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDefinition(definition_id.to_string()))
    }

    /// Get the number of registered definition ids
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Get all registered definition ids
    pub fn definition_ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let definitions: BTreeMap<&String, Vec<&i32>> = self
            .definitions
            .iter()
            .map(|(id, versions)| (id, versions.keys().collect()))
            .collect();
        f.debug_struct("WorkflowRegistry")
            .field("definitions", &definitions)
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Definition id not registered
    #[error("unknown workflow definition: {0}")]
    UnknownDefinition(String),

    /// Definition registered, but not in this version
    #[error("workflow definition {definition_id} has no version {version}")]
    UnknownVersion { definition_id: String, version: i32 },
}
