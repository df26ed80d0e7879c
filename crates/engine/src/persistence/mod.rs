//! Persistence layer for workflow state
//!
//! This module provides:
//! - [`WorkflowStateStore`] trait for saving and loading state snapshots
//! - [`InMemoryWorkflowStateStore`] for testing
//! - [`PostgresWorkflowStateStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkflowStateStore;
pub use postgres::{PostgresWorkflowStateStore, MIGRATOR};
pub use store::{BookmarkMatch, CountRunningFilter, StoreError, WorkflowStateStore};
