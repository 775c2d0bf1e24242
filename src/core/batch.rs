//! # Type-erased executors and batches.
//!
//! The queue holds tasks of many executors with different `Task` types side by
//! side. Each entry stores its payload as `Box<dyn Any + Send>` next to an
//! [`ErasedExecutor`] that knows how to turn the payloads of one batch back
//! into `Vec<E::Task>`.
//!
//! ```text
//! submit_task(executor: Arc<E>, task: E::Task)
//!   └─► PendingEntry { executor: Arc<Typed<E>>, payload: Box<E::Task>, ... }
//!
//! take_next_batch() ─► Vec<PendingEntry>   (all share one ExecutorId)
//!   └─► Batch::assemble
//!         ├─ executor.bind(payloads) ─► Box<dyn BoundTasks>   (Vec<E::Task>)
//!         └─ summary = "src-a, src-b[description]"
//! ```
//!
//! Executor identity is the address of the caller's `Arc<E>`, so two
//! submissions batch together exactly when they share that `Arc`.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::core::publication::PublicationOutcome;
use crate::error::ClusterStateError;
use crate::tasks::{BatchExecutor, ClusterTasksResult, Priority, TaskListener};

/// Opaque task payload.
pub(crate) type Payload = Box<dyn Any + Send>;

/// Identity of an executor instance (address of its `Arc`).
pub(crate) type ExecutorId = usize;

/// Object-safe view of a [`BatchExecutor`].
pub(crate) trait ErasedExecutor<S>: Send + Sync + 'static {
    fn id(&self) -> ExecutorId;

    fn runs_only_on_leader(&self) -> bool;

    /// Recovers typed tasks from the payloads of one batch.
    fn bind(&self, payloads: Vec<Payload>) -> Result<Box<dyn BoundTasks<S>>, ClusterStateError>;

    fn on_publication_complete(&self, outcome: &PublicationOutcome);
}

/// The typed tasks of one batch, ready to run.
pub(crate) trait BoundTasks<S>: Send {
    fn describe(&self) -> String;

    fn execute(&self, current: &Arc<S>) -> Result<ClusterTasksResult<S>, ClusterStateError>;
}

/// Adapter from a concrete executor to [`ErasedExecutor`].
pub(crate) struct Typed<E>(pub(crate) Arc<E>);

impl<S, E> ErasedExecutor<S> for Typed<E>
where
    S: 'static,
    E: BatchExecutor<S>,
{
    fn id(&self) -> ExecutorId {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn runs_only_on_leader(&self) -> bool {
        self.0.runs_only_on_leader()
    }

    fn bind(&self, payloads: Vec<Payload>) -> Result<Box<dyn BoundTasks<S>>, ClusterStateError> {
        let mut tasks = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match payload.downcast::<E::Task>() {
                Ok(task) => tasks.push(*task),
                Err(_) => {
                    return Err(ClusterStateError::execution(format!(
                        "task payload is not a {}",
                        std::any::type_name::<E::Task>()
                    )));
                }
            }
        }
        Ok(Box::new(TypedTasks {
            executor: Arc::clone(&self.0),
            tasks,
            _state: PhantomData,
        }))
    }

    fn on_publication_complete(&self, outcome: &PublicationOutcome) {
        self.0.on_publication_complete(outcome);
    }
}

struct TypedTasks<S, E: BatchExecutor<S>> {
    executor: Arc<E>,
    tasks: Vec<E::Task>,
    _state: PhantomData<fn() -> S>,
}

impl<S, E> BoundTasks<S> for TypedTasks<S, E>
where
    S: 'static,
    E: BatchExecutor<S>,
{
    fn describe(&self) -> String {
        self.executor.describe_tasks(&self.tasks)
    }

    fn execute(&self, current: &Arc<S>) -> Result<ClusterTasksResult<S>, ClusterStateError> {
        self.executor.execute(current, &self.tasks)
    }
}

/// A queued task.
pub(crate) struct PendingEntry<S> {
    /// Assigned by the queue under its lock.
    pub(crate) insert_order: u64,
    pub(crate) priority: Priority,
    pub(crate) source: Arc<str>,
    pub(crate) submitted_at: Duration,
    pub(crate) executor: Arc<dyn ErasedExecutor<S>>,
    pub(crate) payload: Payload,
    pub(crate) listener: TaskListener<S>,
}

impl<S> PendingEntry<S> {
    pub(crate) fn new(
        source: Arc<str>,
        priority: Priority,
        submitted_at: Duration,
        executor: Arc<dyn ErasedExecutor<S>>,
        payload: Payload,
        listener: TaskListener<S>,
    ) -> Self {
        Self {
            insert_order: 0,
            priority,
            source,
            submitted_at,
            executor,
            payload,
            listener,
        }
    }
}

/// Bookkeeping for one task of a batch once its payload has been handed over.
pub(crate) struct BatchTask<S> {
    pub(crate) source: Arc<str>,
    pub(crate) listener: TaskListener<S>,
}

/// Tasks of one executor, executed as one state transition.
pub(crate) struct Batch<S> {
    pub(crate) executor: Arc<dyn ErasedExecutor<S>>,
    pub(crate) tasks: Vec<BatchTask<S>>,
    pub(crate) bound: Result<Box<dyn BoundTasks<S>>, ClusterStateError>,
    pub(crate) summary: Arc<str>,
}

impl<S: 'static> Batch<S> {
    /// Builds a batch from entries sharing one executor; `None` if empty.
    pub(crate) fn assemble(entries: Vec<PendingEntry<S>>) -> Option<Self> {
        let executor = Arc::clone(&entries.first()?.executor);

        let mut tasks = Vec::with_capacity(entries.len());
        let mut payloads = Vec::with_capacity(entries.len());
        for entry in entries {
            payloads.push(entry.payload);
            tasks.push(BatchTask {
                source: entry.source,
                listener: entry.listener,
            });
        }

        let bound = executor.bind(payloads);
        let description = bound.as_ref().map(|b| b.describe()).unwrap_or_default();
        let summary = summarize(tasks.iter().map(|t| t.source.as_ref()), &description);

        Some(Self {
            executor,
            tasks,
            bound,
            summary: summary.into(),
        })
    }
}

/// Distinct sources in first-seen order joined by `", "`, then `[description]`
/// when the executor provides one.
pub(crate) fn summarize<'a>(sources: impl Iterator<Item = &'a str>, description: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for source in sources {
        if !seen.contains(&source) {
            seen.push(source);
        }
    }
    let mut summary = seen.join(", ");
    if !description.is_empty() {
        summary.push('[');
        summary.push_str(description);
        summary.push(']');
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::ClusterStateTaskListener;

    struct Sum;

    impl BatchExecutor<u64> for Sum {
        type Task = u64;

        fn execute(
            &self,
            current: &Arc<u64>,
            tasks: &[u64],
        ) -> Result<ClusterTasksResult<u64>, ClusterStateError> {
            let next = **current + tasks.iter().sum::<u64>();
            Ok(ClusterTasksResult::all_succeeded(
                Arc::new(next),
                tasks.len(),
            ))
        }

        fn describe_tasks(&self, tasks: &[u64]) -> String {
            format!("{} values", tasks.len())
        }
    }

    struct Ignore;

    impl ClusterStateTaskListener<u64> for Ignore {
        fn on_failure(&self, _error: &ClusterStateError) {}
    }

    fn entry(exec: &Arc<Sum>, source: &str, value: u64) -> PendingEntry<u64> {
        PendingEntry::new(
            source.into(),
            Priority::Normal,
            Duration::ZERO,
            Arc::new(Typed(Arc::clone(exec))),
            Box::new(value),
            TaskListener::basic(Arc::new(Ignore)),
        )
    }

    #[test]
    fn test_summary_dedups_sources() {
        let s = summarize(["a", "b", "a", "c"].into_iter(), "");
        assert_eq!(s, "a, b, c");
        let s = summarize(["a"].into_iter(), "2 things");
        assert_eq!(s, "a[2 things]");
    }

    #[test]
    fn test_typed_identity_follows_inner_arc() {
        let exec = Arc::new(Sum);
        let a: Arc<dyn ErasedExecutor<u64>> = Arc::new(Typed(Arc::clone(&exec)));
        let b: Arc<dyn ErasedExecutor<u64>> = Arc::new(Typed(Arc::clone(&exec)));
        let other: Arc<dyn ErasedExecutor<u64>> = Arc::new(Typed(Arc::new(Sum)));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), other.id());
    }

    #[test]
    fn test_assemble_binds_payloads_in_order() {
        let exec = Arc::new(Sum);
        let batch = Batch::assemble(vec![
            entry(&exec, "x", 1),
            entry(&exec, "y", 2),
            entry(&exec, "x", 3),
        ])
        .expect("non-empty");

        assert_eq!(batch.tasks.len(), 3);
        assert_eq!(&*batch.summary, "x, y[3 values]");

        let bound = batch.bound.expect("payloads match");
        let result = bound.execute(&Arc::new(10)).expect("ok");
        assert_eq!(*result.new_state, 16);
    }

    #[test]
    fn test_mismatched_payload_fails_bind() {
        let exec: Arc<dyn ErasedExecutor<u64>> = Arc::new(Typed(Arc::new(Sum)));
        let err = exec
            .bind(vec![Box::new("not a number")])
            .err()
            .expect("mismatch");
        assert_eq!(err.as_label(), "execution_failed");
    }

    #[test]
    fn test_assemble_empty_is_none() {
        assert!(Batch::<u64>::assemble(Vec::new()).is_none());
    }
}
