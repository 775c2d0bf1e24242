//! Single-task conveniences on top of [`BatchExecutor`].
//!
//! - [`ClusterStateUpdateTask`]: a task that is its own executor. Each
//!   submission is wrapped in a fresh [`UnbatchedExecutor`], so it never shares
//!   a batch with anything else.
//! - [`LocalExecutor`]: runs a closure against the current state on the update
//!   loop without changing it and without requiring leadership.

use std::sync::Arc;

use parking_lot::Mutex;

use super::executor::{BatchExecutor, ClusterTasksResult};
use super::priority::Priority;
use crate::error::ClusterStateError;

/// A state update that carries its own logic.
pub trait ClusterStateUpdateTask<S>: Send + Sync + 'static {
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Computes the new state. Returning `current` itself means "no change".
    fn execute(&self, current: &Arc<S>) -> Result<Arc<S>, ClusterStateError>;
}

/// Executor identity for exactly one [`ClusterStateUpdateTask`] submission.
pub(crate) struct UnbatchedExecutor<T> {
    task: Arc<T>,
}

impl<T> UnbatchedExecutor<T> {
    pub(crate) fn new(task: Arc<T>) -> Self {
        Self { task }
    }
}

impl<S, T> BatchExecutor<S> for UnbatchedExecutor<T>
where
    S: Send + Sync + 'static,
    T: ClusterStateUpdateTask<S>,
{
    type Task = ();

    fn execute(
        &self,
        current: &Arc<S>,
        tasks: &[()],
    ) -> Result<ClusterTasksResult<S>, ClusterStateError> {
        let new_state = self.task.execute(current)?;
        Ok(ClusterTasksResult::all_succeeded(new_state, tasks.len()))
    }
}

type LocalFn<S> = Box<dyn FnOnce(&Arc<S>) + Send>;

/// Runs a closure once against the current state; never changes it.
pub(crate) struct LocalExecutor<S> {
    f: Mutex<Option<LocalFn<S>>>,
}

impl<S> LocalExecutor<S> {
    pub(crate) fn new(f: impl FnOnce(&Arc<S>) + Send + 'static) -> Self {
        Self {
            f: Mutex::new(Some(Box::new(f))),
        }
    }
}

impl<S> BatchExecutor<S> for LocalExecutor<S>
where
    S: Send + Sync + 'static,
{
    type Task = ();

    fn execute(
        &self,
        current: &Arc<S>,
        tasks: &[()],
    ) -> Result<ClusterTasksResult<S>, ClusterStateError> {
        if let Some(f) = self.f.lock().take() {
            f(current);
        }
        Ok(ClusterTasksResult::all_succeeded(
            Arc::clone(current),
            tasks.len(),
        ))
    }

    fn runs_only_on_leader(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Bump;

    impl ClusterStateUpdateTask<u32> for Bump {
        fn priority(&self) -> Priority {
            Priority::Urgent
        }

        fn execute(&self, current: &Arc<u32>) -> Result<Arc<u32>, ClusterStateError> {
            Ok(Arc::new(**current + 1))
        }
    }

    #[test]
    fn test_unbatched_executor_delegates() {
        let exec = UnbatchedExecutor::new(Arc::new(Bump));
        let current = Arc::new(41u32);
        let result = BatchExecutor::<u32>::execute(&exec, &current, &[()]).expect("ok");
        assert_eq!(*result.new_state, 42);
        assert_eq!(result.outcomes.len(), 1);
        assert!(BatchExecutor::<u32>::runs_only_on_leader(&exec));
    }

    #[test]
    fn test_local_executor_runs_once_and_keeps_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = {
            let calls = calls.clone();
            LocalExecutor::new(move |_: &Arc<u32>| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let current = Arc::new(7u32);

        let first = exec.execute(&current, &[()]).expect("ok");
        let second = exec.execute(&current, &[()]).expect("ok");

        assert!(Arc::ptr_eq(&first.new_state, &current));
        assert!(Arc::ptr_eq(&second.new_state, &current));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!exec.runs_only_on_leader());
    }
}
