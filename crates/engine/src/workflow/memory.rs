//! Memory register: the variables shared by all activities of a run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Run-scoped variable storage, persisted with the workflow state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryRegister {
    variables: BTreeMap<String, serde_json::Value>,
}

impl MemoryRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }

    /// Set a variable, returning the previous value
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<serde_json::Value> {
        self.variables.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.variables.iter()
    }
}
