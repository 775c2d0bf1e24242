//! # MasterService: the caller-facing handle of the update loop.
//!
//! [`MasterService`] accepts task submissions from any thread, owns the
//! update loop and the starvation ticker, and exposes read-only views of the
//! current state and the pending queue.
//!
//! ## High-level architecture
//! ```text
//! callers (any thread):
//!   submit_task / submit_tasks / submit_update_task / submit_local_task
//!        │
//!        ├─ not leader ─► on_failure(NotMaster)          (never queued)
//!        ├─ closed     ─► on_failure(Closed)
//!        └─► PendingQueue ──notify──► run_loop (one tokio task)
//!                                        ├─► BatchExecutor::execute
//!                                        ├─► Publisher::publish ─► AckAggregator
//!                                        └─► listeners
//!
//! run_starvation_ticker (optional tokio task) ─► StarvationWatcher
//!
//! close():
//!   token.cancel() ─► loop exits after the in-flight batch
//!   queue.drain()  ─► on_failure(Closed) for every queued task ─► ServiceClosed
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use masterloop::{
//!     AckListener, ClusterState, ClusterStateError, ClusterStateTaskListener,
//!     ClusterStateUpdateTask, MasterService, NodeId, PublicationEvent, PublishError,
//!     Publisher, TaskListener,
//! };
//!
//! struct Doc { version: i64, uuid: String }
//!
//! impl ClusterState for Doc {
//!     fn version(&self) -> i64 { self.version }
//!     fn state_uuid(&self) -> &str { &self.uuid }
//!     fn nodes(&self) -> &[NodeId] { &[] }
//! }
//!
//! struct Local;
//!
//! #[async_trait]
//! impl Publisher<Doc> for Local {
//!     async fn publish(
//!         &self,
//!         _event: PublicationEvent<Doc>,
//!         _ack: Arc<dyn AckListener>,
//!     ) -> Result<(), PublishError> {
//!         Ok(())
//!     }
//! }
//!
//! struct Bump;
//!
//! impl ClusterStateUpdateTask<Doc> for Bump {
//!     fn execute(&self, current: &Arc<Doc>) -> Result<Arc<Doc>, ClusterStateError> {
//!         let v = current.version + 1;
//!         Ok(Arc::new(Doc { version: v, uuid: format!("doc-{v}") }))
//!     }
//! }
//!
//! struct Done(tokio::sync::mpsc::UnboundedSender<i64>);
//!
//! impl ClusterStateTaskListener<Doc> for Done {
//!     fn on_failure(&self, _error: &ClusterStateError) {}
//!     fn cluster_state_processed(&self, _old: &Arc<Doc>, new: &Arc<Doc>) {
//!         let _ = self.0.send(new.version);
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let initial = Arc::new(Doc { version: 0, uuid: "doc-0".into() });
//!     let service = MasterService::builder(initial, Arc::new(Local)).build();
//!     service.start().expect("fresh service");
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     service.submit_update_task("bump", Arc::new(Bump), TaskListener::basic(Arc::new(Done(tx))));
//!
//!     assert_eq!(rx.recv().await, Some(1));
//!     assert_eq!(service.state().version, 1);
//!     service.close();
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{Instrument, debug, info};

use super::batch::{ErasedExecutor, PendingEntry, Typed};
use super::builder::MasterServiceBuilder;
use super::publication::Publisher;
use super::queue::PendingTask;
use super::runner::{Shared, call_listener, run_loop, run_starvation_ticker};
use crate::cluster::ClusterState;
use crate::error::{ClusterStateError, ServiceError};
use crate::events::{Event, EventKind};
use crate::tasks::{
    BatchExecutor, ClusterStateUpdateTask, LocalExecutor, Priority, TaskListener,
    UnbatchedExecutor,
};

/// Leader-side scheduler of cluster state updates.
pub struct MasterService<S: ClusterState> {
    shared: Arc<Shared<S>>,
    started: AtomicBool,
}

impl<S: ClusterState> MasterService<S> {
    /// Starts building a service around `initial_state` and `publisher`.
    pub fn builder(
        initial_state: Arc<S>,
        publisher: Arc<dyn Publisher<S>>,
    ) -> MasterServiceBuilder<S> {
        MasterServiceBuilder::new(initial_state, publisher)
    }

    pub(crate) fn from_shared(shared: Arc<Shared<S>>) -> Self {
        Self {
            shared,
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the update loop (and the starvation ticker, if enabled).
    ///
    /// Must be called from within a tokio runtime. Tasks submitted before
    /// `start` stay queued until then.
    pub fn start(&self) -> Result<(), ServiceError> {
        if self.shared.token.is_cancelled() {
            return Err(ServiceError::Closed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServiceError::AlreadyStarted);
        }

        tokio::spawn(run_loop(Arc::clone(&self.shared)).in_current_span());
        if let Some(every) = self.shared.cfg.starvation_tick() {
            tokio::spawn(
                run_starvation_ticker(Arc::clone(&self.shared), every).in_current_span(),
            );
        }
        info!("master service started");
        Ok(())
    }

    /// Stops the loop after the in-flight batch and fails every queued task with
    /// [`ClusterStateError::Closed`]. Later submissions fail the same way.
    pub fn close(&self) {
        if self.shared.token.is_cancelled() {
            return;
        }
        self.shared.token.cancel();

        let drained = self.shared.queue.drain();
        let failed = drained.len();
        for entry in drained {
            call_listener(&entry.source, "on_failure", || {
                entry.listener.on_failure(&ClusterStateError::Closed)
            });
        }
        info!("master service closed, failed [{}] queued tasks", failed);
        self.shared
            .bus
            .publish(Event::now(EventKind::ServiceClosed).with_pending(failed));
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// The last committed state.
    pub fn state(&self) -> Arc<S> {
        self.shared.current_state()
    }

    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Submits one task; it is batched with every other queued task of the same `executor`.
    pub fn submit_task<E>(
        &self,
        source: impl Into<Arc<str>>,
        priority: Priority,
        executor: &Arc<E>,
        task: E::Task,
        listener: TaskListener<S>,
    ) where
        E: BatchExecutor<S>,
    {
        self.submit_tasks(source, priority, executor, vec![(task, listener)]);
    }

    /// Submits several tasks of one executor at once; they always run in the same batch.
    pub fn submit_tasks<E>(
        &self,
        source: impl Into<Arc<str>>,
        priority: Priority,
        executor: &Arc<E>,
        tasks: Vec<(E::Task, TaskListener<S>)>,
    ) where
        E: BatchExecutor<S>,
    {
        let erased: Arc<dyn ErasedExecutor<S>> = Arc::new(Typed(Arc::clone(executor)));
        self.enqueue(source.into(), priority, erased, tasks);
    }

    /// Submits a self-contained update; it never shares a batch with other tasks.
    pub fn submit_update_task<T>(
        &self,
        source: impl Into<Arc<str>>,
        task: Arc<T>,
        listener: TaskListener<S>,
    ) where
        T: ClusterStateUpdateTask<S>,
    {
        let priority = task.priority();
        let executor = Arc::new(UnbatchedExecutor::new(task));
        self.submit_task(source, priority, &executor, (), listener);
    }

    /// Runs `f` against the current state on the update loop.
    ///
    /// The state is not changed and leadership is not required.
    pub fn submit_local_task(
        &self,
        source: impl Into<Arc<str>>,
        priority: Priority,
        f: impl FnOnce(&Arc<S>) + Send + 'static,
        listener: TaskListener<S>,
    ) {
        let executor = Arc::new(LocalExecutor::new(f));
        self.submit_task(source, priority, &executor, (), listener);
    }

    /// Queued and executing tasks, executing first.
    pub fn pending_tasks(&self) -> Vec<PendingTask> {
        self.shared.queue.pending_tasks(self.shared.clock.now())
    }

    pub fn number_of_pending_tasks(&self) -> usize {
        self.shared.queue.number_of_pending_tasks()
    }

    /// How long the oldest pending task has been waiting.
    pub fn max_task_wait_time(&self) -> Duration {
        self.pending_tasks()
            .iter()
            .map(|t| t.time_in_queue)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn enqueue<T: Send + 'static>(
        &self,
        source: Arc<str>,
        priority: Priority,
        executor: Arc<dyn ErasedExecutor<S>>,
        tasks: Vec<(T, TaskListener<S>)>,
    ) {
        if tasks.is_empty() {
            return;
        }

        if executor.runs_only_on_leader() && !self.shared.leadership.is_leader() {
            debug!("failing [{}]: local node is no longer master", source);
            let err = ClusterStateError::NotMaster {
                task_source: Arc::clone(&source),
            };
            for (_, listener) in &tasks {
                call_listener(&source, "on_failure", || listener.on_failure(&err));
            }
            self.publish_rejected(&source, &err);
            return;
        }

        let submitted_at = self.shared.clock.now();
        let entries = tasks
            .into_iter()
            .map(|(task, listener)| {
                PendingEntry::new(
                    Arc::clone(&source),
                    priority,
                    submitted_at,
                    Arc::clone(&executor),
                    Box::new(task),
                    listener,
                )
            })
            .collect();

        if let Err(rejected) = self.shared.queue.submit(entries) {
            for entry in &rejected {
                call_listener(&entry.source, "on_failure", || {
                    entry.listener.on_failure(&ClusterStateError::Closed)
                });
            }
            self.publish_rejected(&source, &ClusterStateError::Closed);
        }
    }

    fn publish_rejected(&self, source: &Arc<str>, err: &ClusterStateError) {
        self.shared.bus.publish(
            Event::now(EventKind::TaskRejected)
                .with_source(Arc::clone(source))
                .with_reason(err.to_string()),
        );
    }
}

impl<S: ClusterState> Drop for MasterService<S> {
    fn drop(&mut self) {
        self.close();
    }
}
