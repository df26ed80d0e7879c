//! Handles through which activities and behaviors touch the run

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::context::WorkflowExecutionContext;
use super::scheduler::Continuation;
use crate::activity::{properties, ActivityError, ActivityNode};
use crate::workflow::{ActivityStatus, Bookmark, InstanceId, PropertyValue, Signal};

/// How a child is scheduled
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Tag of the continuation dispatched to the scheduling activity
    pub callback: Option<String>,
    /// Initial properties of the child instance
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Execution context of one activity instance
///
/// Borrowed mutably from the workflow execution context for the duration of
/// a single hook call.
pub struct ActivityExecutionContext<'a> {
    workflow: &'a mut WorkflowExecutionContext,
    instance_id: InstanceId,
    node: Arc<ActivityNode>,
}

impl<'a> ActivityExecutionContext<'a> {
    pub(crate) fn new(
        workflow: &'a mut WorkflowExecutionContext,
        instance_id: InstanceId,
        node: Arc<ActivityNode>,
    ) -> Self {
        Self {
            workflow,
            instance_id,
            node,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn node(&self) -> &ActivityNode {
        &self.node
    }

    /// Id of the workflow instance being run
    pub fn workflow_instance_id(&self) -> &str {
        self.workflow.id()
    }

    pub fn workflow(&self) -> &WorkflowExecutionContext {
        &*self.workflow
    }

    pub fn status(&self) -> ActivityStatus {
        self.workflow
            .instance(self.instance_id)
            .map_or(ActivityStatus::Canceled, |instance| instance.status)
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.workflow
            .instance(self.instance_id)
            .and_then(|instance| instance.parent)
    }

    pub fn children(&self) -> &[InstanceId] {
        self.workflow
            .instance(self.instance_id)
            .map(|instance| instance.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the run's cancellation token has fired
    pub fn is_cancellation_requested(&self) -> bool {
        self.workflow.is_cancellation_requested()
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.workflow
            .instance(self.instance_id)
            .and_then(|instance| instance.properties.get(key))
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        if let Some(instance) = self.workflow.instance_mut(self.instance_id) {
            instance.properties.insert(key.into(), value.into());
        }
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.workflow
            .instance_mut(self.instance_id)
            .and_then(|instance| instance.properties.remove(key))
    }

    /// Whether a `break` signal reached this instance
    pub fn is_breaking(&self) -> bool {
        self.property(properties::BREAKING)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }

    /// Whether this instance or any ancestor is breaking
    pub fn is_breaking_in_scope(&self) -> bool {
        let mut current = Some(self.instance_id);
        while let Some(id) = current {
            let Some(instance) = self.workflow.instance(id) else {
                return false;
            };
            if instance
                .properties
                .get(properties::BREAKING)
                .and_then(PropertyValue::as_bool)
                .unwrap_or(false)
            {
                return true;
            }
            current = instance.parent;
        }
        false
    }

    // ========================================================================
    // Inputs, outputs and variables
    // ========================================================================

    /// Resolve a named input binding; unbound inputs are null
    pub fn input(&self, name: &str) -> Result<serde_json::Value, ActivityError> {
        match self.node.input(name) {
            Some(input) => Ok(input.resolve(
                self.workflow.evaluator(),
                self.workflow.memory(),
                self.workflow.input(),
            )?),
            None => Ok(serde_json::Value::Null),
        }
    }

    /// Resolve a named input and deserialize it
    pub fn input_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, ActivityError> {
        let value = self.input(name)?;
        serde_json::from_value(value).map_err(|e| {
            ActivityError::new(format!("input {name}: {e}")).with_type("serialization")
        })
    }

    /// Write a named output into its bound variable
    ///
    /// Returns false when the node has no binding for the output.
    pub fn set_output(&mut self, name: &str, value: serde_json::Value) -> bool {
        let Some(output) = self.node.output(name) else {
            return false;
        };
        let variable = output.variable.clone();
        self.workflow.memory_mut().set(variable, value);
        true
    }

    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.workflow.memory().get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.workflow.memory_mut().set(name, value);
    }

    /// Input supplied by the caller of this run
    pub fn workflow_input(&self, name: &str) -> Option<&serde_json::Value> {
        self.workflow.input().get(name)
    }

    pub fn workflow_inputs(&self) -> &BTreeMap<String, serde_json::Value> {
        self.workflow.input()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Child node ids of one of this node's ports
    pub fn port(&self, name: &str) -> &[String] {
        self.node.port(name)
    }

    /// Create a child instance of `node_id` and enqueue it
    pub fn schedule_activity(
        &mut self,
        node_id: &str,
        options: ScheduleOptions,
    ) -> Result<InstanceId, ActivityError> {
        let node = self
            .workflow
            .workflow()
            .node(node_id)
            .cloned()
            .ok_or_else(|| {
                ActivityError::new(format!("unknown node {node_id}")).with_type("scheduling")
            })?;

        let child = self
            .workflow
            .create_instance(&node, Some(self.instance_id), options.properties);
        let continuation = options.callback.map(|callback| Continuation {
            owner: self.instance_id,
            callback,
        });
        self.workflow.schedule(child, continuation);

        debug!(
            instance_id = %self.workflow.id(),
            parent = %self.node.node_id(),
            child = %node_id,
            "scheduled child"
        );
        Ok(child)
    }

    /// Schedule every child of a port, in order
    pub fn schedule_port(
        &mut self,
        port: &str,
        options: ScheduleOptions,
    ) -> Result<Vec<InstanceId>, ActivityError> {
        let node = Arc::clone(&self.node);
        node.port(port)
            .iter()
            .map(|node_id| self.schedule_activity(node_id, options.clone()))
            .collect()
    }

    /// Cancel a descendant and its subtree without notifying anyone
    pub fn cancel_child(&mut self, child: InstanceId) -> Result<(), ActivityError> {
        if !self.workflow.is_ancestor(self.instance_id, child) {
            return Err(ActivityError::new(format!(
                "instance {child} is not a descendant of {}",
                self.instance_id
            ))
            .with_type("scheduling"));
        }
        self.workflow.cancel_instance(child);
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Request completion of this instance
    pub fn complete(&mut self) {
        self.workflow.request_completion(self.instance_id);
    }

    /// Request completion of this instance or one of its ancestors
    pub fn complete_instance(&mut self, target: InstanceId) -> Result<(), ActivityError> {
        if target != self.instance_id && !self.workflow.is_ancestor(target, self.instance_id) {
            return Err(ActivityError::new(format!(
                "instance {target} is not {} or one of its ancestors",
                self.instance_id
            ))
            .with_type("scheduling"));
        }
        self.workflow.request_completion(target);
        Ok(())
    }

    /// Deliver a signal to the ancestors of this instance
    pub fn raise_signal(&mut self, signal: Signal) -> bool {
        self.workflow.raise_signal(self.instance_id, &signal)
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    pub fn create_bookmark(&mut self, payload: serde_json::Value) -> Bookmark {
        self.create_bookmark_with_metadata(payload, BTreeMap::new())
    }

    pub fn create_bookmark_with_metadata(
        &mut self,
        payload: serde_json::Value,
        metadata: BTreeMap<String, String>,
    ) -> Bookmark {
        let bookmark = Bookmark::new(
            self.instance_id,
            self.node.node_id(),
            self.node.activity_type(),
            payload,
        )
        .with_metadata(metadata);
        self.workflow.register_bookmark(bookmark.clone());
        bookmark
    }

    pub fn clear_bookmarks(&mut self) -> usize {
        self.workflow.clear_bookmarks(self.instance_id)
    }

    /// The bookmark this instance was resumed from, during its first execution
    /// after the resume
    pub fn resumed_bookmark(&self) -> Option<&Bookmark> {
        self.workflow
            .resumed_bookmark()
            .filter(|bookmark| bookmark.activity_instance_id == self.instance_id)
    }
}

/// View of one ancestor while a signal passes through it
pub struct SignalContext<'a> {
    workflow: &'a mut WorkflowExecutionContext,
    origin: InstanceId,
    current: InstanceId,
    handled: bool,
}

impl<'a> SignalContext<'a> {
    pub(crate) fn new(
        workflow: &'a mut WorkflowExecutionContext,
        origin: InstanceId,
        current: InstanceId,
        handled: bool,
    ) -> Self {
        Self {
            workflow,
            origin,
            current,
            handled,
        }
    }

    /// Instance that raised the signal
    pub fn origin(&self) -> InstanceId {
        self.origin
    }

    /// Ancestor currently observing the signal
    pub fn current(&self) -> InstanceId {
        self.current
    }

    pub fn node_id(&self) -> &str {
        self.workflow
            .instance(self.current)
            .map_or("", |instance| instance.node_id.as_str())
    }

    pub fn origin_node_id(&self) -> &str {
        self.workflow
            .instance(self.origin)
            .map_or("", |instance| instance.node_id.as_str())
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.workflow
            .instance(self.current)
            .and_then(|instance| instance.properties.get(key))
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        if let Some(instance) = self.workflow.instance_mut(self.current) {
            instance.properties.insert(key.into(), value.into());
        }
    }

    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.workflow.memory().get(name)
    }

    /// Cancel every child of the observing ancestor and request its
    /// completion
    ///
    /// The origin of the signal is always inside the canceled subtree, so
    /// its own completion is dropped.
    pub fn cancel_scope(&mut self) {
        let children = self
            .workflow
            .instance(self.current)
            .map(|instance| instance.children.clone())
            .unwrap_or_default();
        for child in children {
            self.workflow.cancel_instance(child);
        }
        self.workflow.request_completion(self.current);
    }
}
