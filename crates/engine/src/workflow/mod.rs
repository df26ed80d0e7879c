//! Workflow definitions, runtime state and the data they share
//!
//! This module contains the workflow primitives:
//! - [`Workflow`] frozen, versioned activity trees
//! - [`WorkflowState`] persisted snapshot of an instance
//! - [`Bookmark`] suspension points and their payload hashes
//! - [`Signal`] messages raised from children to ancestors
//! - [`Input`] / [`Output`] bindings resolved against the [`MemoryRegister`]

pub mod bookmark;
mod definition;
pub mod expression;
pub mod memory;
pub mod signal;
pub mod state;

pub use bookmark::{payload_hash, Bookmark};
pub use definition::{Variable, Workflow, WorkflowError};
pub use expression::{
    Expression, ExpressionError, ExpressionEvaluator, Input, NoExpressionEvaluator, Output,
};
pub use memory::MemoryRegister;
pub use signal::{signal_types, Signal};
pub use state::{
    ActivityInstance, ActivityStatus, ExecutionEvent, ExecutionLogEntry, FaultKind, InstanceId,
    PropertyValue, WorkflowFault, WorkflowState, WorkflowStatus, WorkflowSubStatus,
};
