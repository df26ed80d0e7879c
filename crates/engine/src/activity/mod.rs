//! Activity abstractions
//!
//! An activity node is data (id, bindings, ports, behaviors) plus a shared
//! [`Activity`] implementation that supplies the behavior. Nodes are
//! assembled with [`NodeBuilder`] and frozen into a
//! [`Workflow`](crate::workflow::Workflow).

mod behavior;
mod definition;
mod node;

pub use behavior::{properties, Behavior, BreakBehavior, CancelBehavior, JoinBehavior};
pub use definition::{Activity, ActivityError, ChildCompletion, ExecutionOutcome};
pub use node::{ActivityNode, NodeBuilder, Port};
