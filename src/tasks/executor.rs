//! # Batch executor contract.
//!
//! A [`BatchExecutor`] turns `(current state, tasks)` into a new state plus one
//! outcome per task. One executor instance stands for one kind of mutation;
//! every queued task submitted with the same `Arc<E>` is eligible to run in the
//! same batch.
//!
//! ## Rules
//! - `execute` is only called from the update loop, one batch at a time.
//! - Returning the input `Arc` unchanged (pointer identity) means "no change":
//!   nothing is published.
//! - `outcomes` are index-aligned with `tasks`; a length mismatch fails the batch.
//! - Returning `Err` (or panicking) fails every task of the batch with that error.

use std::sync::Arc;

use crate::core::PublicationOutcome;
use crate::error::ClusterStateError;

/// Computes state transitions for batches of tasks of one kind.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use masterloop::{BatchExecutor, ClusterState, ClusterStateError, ClusterTasksResult, NodeId};
///
/// struct Counter { version: i64, uuid: String, value: u64 }
///
/// impl ClusterState for Counter {
///     fn version(&self) -> i64 { self.version }
///     fn state_uuid(&self) -> &str { &self.uuid }
///     fn nodes(&self) -> &[NodeId] { &[] }
/// }
///
/// struct Increment;
///
/// impl BatchExecutor<Counter> for Increment {
///     type Task = u64;
///
///     fn execute(
///         &self,
///         current: &Arc<Counter>,
///         tasks: &[u64],
///     ) -> Result<ClusterTasksResult<Counter>, ClusterStateError> {
///         let next = Counter {
///             version: current.version + 1,
///             uuid: format!("counter-{}", current.version + 1),
///             value: current.value + tasks.iter().sum::<u64>(),
///         };
///         Ok(ClusterTasksResult::all_succeeded(Arc::new(next), tasks.len()))
///     }
/// }
/// ```
pub trait BatchExecutor<S>: Send + Sync + 'static {
    /// Payload of one task.
    type Task: Send + 'static;

    /// Computes the new state for `tasks` (queue order) against `current`.
    fn execute(
        &self,
        current: &Arc<S>,
        tasks: &[Self::Task],
    ) -> Result<ClusterTasksResult<S>, ClusterStateError>;

    /// Short description of the batch, appended to the task sources in logs.
    fn describe_tasks(&self, tasks: &[Self::Task]) -> String {
        let _ = tasks;
        String::new()
    }

    /// Called once per batch whose new state went through publication,
    /// committed or not. For bookkeeping only.
    fn on_publication_complete(&self, outcome: &PublicationOutcome) {
        let _ = outcome;
    }

    /// Whether tasks of this executor may only run on the leader.
    fn runs_only_on_leader(&self) -> bool {
        true
    }
}

/// Per-task result of a batch.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success,
    Failure(ClusterStateError),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// Result of executing one batch.
pub struct ClusterTasksResult<S> {
    pub new_state: Arc<S>,
    /// One entry per task, in the order tasks were handed to `execute`.
    pub outcomes: Vec<TaskOutcome>,
}

impl<S> ClusterTasksResult<S> {
    pub fn new(new_state: Arc<S>, outcomes: Vec<TaskOutcome>) -> Self {
        Self {
            new_state,
            outcomes,
        }
    }

    /// Every one of `task_count` tasks succeeded.
    pub fn all_succeeded(new_state: Arc<S>, task_count: usize) -> Self {
        Self::new(new_state, vec![TaskOutcome::Success; task_count])
    }
}

/// Collects outcomes in task order.
#[derive(Debug, Default)]
pub struct ClusterTasksResultBuilder {
    outcomes: Vec<TaskOutcome>,
}

impl ClusterTasksResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(mut self) -> Self {
        self.outcomes.push(TaskOutcome::Success);
        self
    }

    pub fn successes(mut self, n: usize) -> Self {
        self.outcomes.extend(std::iter::repeat_n(TaskOutcome::Success, n));
        self
    }

    pub fn failure(mut self, error: ClusterStateError) -> Self {
        self.outcomes.push(TaskOutcome::Failure(error));
        self
    }

    pub fn build<S>(self, new_state: Arc<S>) -> ClusterTasksResult<S> {
        ClusterTasksResult::new(new_state, self.outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_task_order() {
        let state = Arc::new(());
        let result = ClusterTasksResultBuilder::new()
            .success()
            .failure(ClusterStateError::rejected("bad"))
            .successes(2)
            .build(state);

        let flags: Vec<bool> = result.outcomes.iter().map(TaskOutcome::is_success).collect();
        assert_eq!(flags, vec![true, false, true, true]);
    }
}
