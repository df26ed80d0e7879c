//! Workflow definitions: frozen activity trees

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::activity::{ActivityNode, NodeBuilder, Port};
use crate::engine::CommitStrategy;

/// Error raised when a workflow definition is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("activity id must not be empty (under {parent})")]
    EmptyActivityId { parent: String },

    #[error("duplicate activity id: {0}")]
    DuplicateActivityId(String),

    #[error("activity {node_id} rejected its configuration: {message}")]
    InvalidConfiguration { node_id: String, message: String },
}

/// Workflow-level variable seeded into the memory register of a new run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub default: serde_json::Value,
}

/// An immutable, versioned tree of activity nodes
///
/// Node ids are path-qualified (`root:loop:body`) and assigned here, so the
/// same builder always produces the same ids.
///
/// # Example
///
/// ```
/// use arbor_engine::activities::{Sequence, SetVariable};
/// use arbor_engine::activity::NodeBuilder;
/// use arbor_engine::workflow::{Input, Workflow};
///
/// let workflow = Workflow::new(
///     "greeting",
///     1,
///     NodeBuilder::new("root", Sequence).with_child(
///         Sequence::PORT,
///         NodeBuilder::new("set", SetVariable::new("message"))
///             .with_input(SetVariable::VALUE, Input::literal("hello")),
///     ),
/// )
/// .unwrap();
///
/// assert!(workflow.node("root:set").is_some());
/// ```
pub struct Workflow {
    definition_id: String,
    version: i32,
    root_node_id: String,
    nodes: HashMap<String, Arc<ActivityNode>>,
    /// Builder id to node id
    activity_ids: HashMap<String, String>,
    variables: Vec<Variable>,
    result_variable: Option<String>,
    commit_strategy: Option<CommitStrategy>,
}

impl Workflow {
    /// Freeze a builder tree into a workflow definition
    pub fn new(
        definition_id: impl Into<String>,
        version: i32,
        root: NodeBuilder,
    ) -> Result<Self, WorkflowError> {
        let mut nodes = HashMap::new();
        let mut activity_ids = HashMap::new();
        let root_node_id = freeze(root, None, &mut nodes, &mut activity_ids)?;

        Ok(Self {
            definition_id: definition_id.into(),
            version,
            root_node_id,
            nodes,
            activity_ids,
            variables: Vec::new(),
            result_variable: None,
            commit_strategy: None,
        })
    }

    /// Declare a variable and its initial value
    pub fn with_variable(mut self, name: impl Into<String>, default: serde_json::Value) -> Self {
        self.variables.push(Variable {
            name: name.into(),
            default,
        });
        self
    }

    /// Name the memory variable reported as the run's output
    pub fn with_result_variable(mut self, name: impl Into<String>) -> Self {
        self.result_variable = Some(name.into());
        self
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn root(&self) -> &Arc<ActivityNode> {
        // The root is inserted by `new` and nodes are never removed.
        &self.nodes[&self.root_node_id]
    }

    pub fn root_node_id(&self) -> &str {
        &self.root_node_id
    }

    pub fn node(&self, node_id: &str) -> Option<&Arc<ActivityNode>> {
        self.nodes.get(node_id)
    }

    /// Look up a node by the id it was given on the builder
    pub fn find_by_activity_id(&self, activity_id: &str) -> Option<&Arc<ActivityNode>> {
        self.activity_ids
            .get(activity_id)
            .and_then(|node_id| self.nodes.get(node_id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn result_variable(&self) -> Option<&str> {
        self.result_variable.as_deref()
    }

    /// Commit strategy of nodes that do not set their own
    pub fn with_commit_strategy(mut self, strategy: CommitStrategy) -> Self {
        self.commit_strategy = Some(strategy);
        self
    }

    /// Commit strategy in effect for a node
    pub fn commit_strategy_for(&self, node: &ActivityNode) -> Option<CommitStrategy> {
        node.commit_strategy().or(self.commit_strategy)
    }

    /// Ask every activity whether it accepts its node's configuration
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut node_ids: Vec<&String> = self.nodes.keys().collect();
        node_ids.sort();

        for node_id in node_ids {
            let node = &self.nodes[node_id];
            node.activity()
                .validate(node)
                .map_err(|message| WorkflowError::InvalidConfiguration {
                    node_id: node_id.clone(),
                    message,
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("definition_id", &self.definition_id)
            .field("version", &self.version)
            .field("root_node_id", &self.root_node_id)
            .field("nodes", &self.nodes.len())
            .field("commit_strategy", &self.commit_strategy)
            .finish()
    }
}

fn freeze(
    builder: NodeBuilder,
    parent_node_id: Option<&str>,
    nodes: &mut HashMap<String, Arc<ActivityNode>>,
    activity_ids: &mut HashMap<String, String>,
) -> Result<String, WorkflowError> {
    if builder.id.is_empty() {
        return Err(WorkflowError::EmptyActivityId {
            parent: parent_node_id.unwrap_or("<root>").to_string(),
        });
    }

    let node_id = match parent_node_id {
        Some(parent) => format!("{}:{}", parent, builder.id),
        None => builder.id.clone(),
    };

    if activity_ids
        .insert(builder.id.clone(), node_id.clone())
        .is_some()
    {
        return Err(WorkflowError::DuplicateActivityId(builder.id));
    }

    let mut ports = Vec::with_capacity(builder.ports.len());
    for (name, children) in builder.ports {
        let mut child_ids = Vec::with_capacity(children.len());
        for child in children {
            child_ids.push(freeze(child, Some(&node_id), nodes, activity_ids)?);
        }
        ports.push(Port {
            name,
            nodes: child_ids,
        });
    }

    let mut behaviors = builder.activity.default_behaviors();
    behaviors.extend(builder.behaviors);

    let node = ActivityNode {
        id: builder.id,
        node_id: node_id.clone(),
        name: builder.name,
        parent_node_id: parent_node_id.map(str::to_string),
        inputs: builder.inputs,
        outputs: builder.outputs,
        ports,
        behaviors,
        commit_strategy: builder.commit_strategy,
        activity: builder.activity,
    };
    nodes.insert(node_id.clone(), Arc::new(node));

    Ok(node_id)
}
