//! # Task model.
//!
//! This module provides the caller-facing task types:
//! - [`Priority`] - queue priority, served `Immediate` first
//! - [`BatchExecutor`] - computes one state transition for a batch of tasks
//! - [`ClusterTasksResult`], [`TaskOutcome`] - result of one batch
//! - [`TaskListener`] - per-task outcome callbacks (basic or ack-aware)
//! - [`ClusterStateUpdateTask`] - a single task that is its own executor

mod executor;
mod listener;
mod priority;
mod update_task;

pub use executor::{BatchExecutor, ClusterTasksResult, ClusterTasksResultBuilder, TaskOutcome};
pub use listener::{AckedTaskListener, ClusterStateTaskListener, TaskListener};
pub use priority::Priority;
pub use update_task::ClusterStateUpdateTask;

pub(crate) use update_task::{LocalExecutor, UnbatchedExecutor};
