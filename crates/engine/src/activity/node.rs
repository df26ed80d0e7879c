//! Activity nodes and the builder that assembles them into trees

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Activity, Behavior};
use crate::engine::CommitStrategy;
use crate::workflow::expression::{Input, Output};

/// Named, ordered slot of child nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub nodes: Vec<String>,
}

/// Immutable definition of one node of a workflow tree
///
/// Created by [`Workflow::new`](crate::workflow::Workflow::new) from a
/// [`NodeBuilder`]; children are referenced by node id through the ports.
pub struct ActivityNode {
    pub(crate) id: String,
    pub(crate) node_id: String,
    pub(crate) name: Option<String>,
    pub(crate) parent_node_id: Option<String>,
    pub(crate) inputs: BTreeMap<String, Input>,
    pub(crate) outputs: BTreeMap<String, Output>,
    pub(crate) ports: Vec<Port>,
    pub(crate) behaviors: Vec<Arc<dyn Behavior>>,
    pub(crate) commit_strategy: Option<CommitStrategy>,
    pub(crate) activity: Arc<dyn Activity>,
}

impl ActivityNode {
    /// Start building a node
    pub fn builder(id: impl Into<String>, activity: impl Activity) -> NodeBuilder {
        NodeBuilder::new(id, activity)
    }

    /// Id given on the builder, unique within the workflow
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path-qualified id, e.g. `root:loop:body`
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent_node_id(&self) -> Option<&str> {
        self.parent_node_id.as_deref()
    }

    pub fn activity(&self) -> &Arc<dyn Activity> {
        &self.activity
    }

    pub fn activity_type(&self) -> &str {
        self.activity.activity_type()
    }

    pub fn version(&self) -> i32 {
        self.activity.version()
    }

    pub fn behaviors(&self) -> &[Arc<dyn Behavior>] {
        &self.behaviors
    }

    /// Commit strategy set on this node, if any
    pub fn commit_strategy(&self) -> Option<CommitStrategy> {
        self.commit_strategy
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Child node ids of a port; empty when the port does not exist
    pub fn port(&self, name: &str) -> &[String] {
        self.ports
            .iter()
            .find(|port| port.name == name)
            .map(|port| port.nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Child node ids of every port, in port order
    pub fn children(&self) -> impl Iterator<Item = &String> {
        self.ports.iter().flat_map(|port| port.nodes.iter())
    }
}

impl std::fmt::Debug for ActivityNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityNode")
            .field("node_id", &self.node_id)
            .field("activity_type", &self.activity_type())
            .field("ports", &self.ports)
            .field(
                "behaviors",
                &self.behaviors.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Mutable description of a node and its subtree
pub struct NodeBuilder {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) activity: Arc<dyn Activity>,
    pub(crate) inputs: BTreeMap<String, Input>,
    pub(crate) outputs: BTreeMap<String, Output>,
    pub(crate) ports: Vec<(String, Vec<NodeBuilder>)>,
    pub(crate) behaviors: Vec<Arc<dyn Behavior>>,
    pub(crate) commit_strategy: Option<CommitStrategy>,
}

impl NodeBuilder {
    pub fn new(id: impl Into<String>, activity: impl Activity) -> Self {
        Self::from_arc(id, Arc::new(activity))
    }

    /// Build a node around an activity implementation shared with other nodes
    pub fn from_arc(id: impl Into<String>, activity: Arc<dyn Activity>) -> Self {
        Self {
            id: id.into(),
            name: None,
            activity,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            ports: Vec::new(),
            behaviors: Vec::new(),
            commit_strategy: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, input: Input) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    /// Write the named output into a memory variable
    pub fn with_output(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), Output::new(variable));
        self
    }

    /// Append a child to a port, creating the port on first use
    pub fn with_child(mut self, port: impl Into<String>, child: NodeBuilder) -> Self {
        let port = port.into();
        match self.ports.iter_mut().find(|(name, _)| *name == port) {
            Some((_, children)) => children.push(child),
            None => self.ports.push((port, vec![child])),
        }
        self
    }

    /// Append several children to a port, in order
    pub fn with_children(
        self,
        port: impl Into<String>,
        children: impl IntoIterator<Item = NodeBuilder>,
    ) -> Self {
        let port = port.into();
        children
            .into_iter()
            .fold(self, |builder, child| builder.with_child(port.clone(), child))
    }

    pub fn with_behavior(mut self, behavior: impl Behavior) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    /// Persist the run around this node's execution
    pub fn with_commit_strategy(mut self, strategy: CommitStrategy) -> Self {
        self.commit_strategy = Some(strategy);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("id", &self.id)
            .field("activity_type", &self.activity.activity_type())
            .field("ports", &self.ports)
            .finish()
    }
}
