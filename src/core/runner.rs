//! # The master update loop.
//!
//! A single tokio task owns every write of the current state. It takes one
//! executor batch at a time from the [`PendingQueue`], runs it, publishes the
//! result and delivers the per-task outcomes before looking at the queue again.
//!
//! ## Batch flow
//!
//! ```text
//! take_next_batch()
//!   │
//!   ├─ not leader (and executor requires it) ─► on_failure(NotMaster)      → TaskRejected
//!   │
//!   ├─ execute(current, tasks)
//!   │     ├─ Err / panic / outcome count mismatch ─► on_failure(err)        → ComputeFailed
//!   │     ├─ same Arc  ─► cluster_state_processed(current, current)         → StateUnchanged
//!   │     └─ new Arc   ─► publish(old, new)
//!   │                       ├─ Ok  ─► cluster_state_processed(old, new),
//!   │                       │         ack timers, on_publication_complete   → StatePublished
//!   │                       └─ Err ─► roll back, on_failure(Publication),
//!   │                                 on_publication_complete               → PublicationFailed
//!   └─ loop
//! ```
//!
//! ## Rules
//! - At most one batch is computing or waiting for its commit decision.
//! - Listener and executor callbacks are panic-isolated: a panic is logged at
//!   ERROR and the loop carries on.
//! - Every timed step is logged at WARN when slower than
//!   `Config::slow_task_logging_threshold`, DEBUG otherwise.
//! - Ack timers outlive the batch; the loop never waits for them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::ack::{AckAggregator, TaskAckTracker};
use super::batch::{Batch, BatchTask, ErasedExecutor};
use super::publication::{AckListener, PublicationEvent, PublicationOutcome, Publisher};
use super::queue::PendingQueue;
use super::starvation::StarvationWatcher;
use crate::cluster::{ClusterState, Leadership};
use crate::config::Config;
use crate::error::{ClusterStateError, PublishError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::TaskOutcome;
use crate::time::{Clock, format_duration};

/// Runs a listener callback, logging instead of propagating a panic.
pub(crate) fn call_listener(source: &str, callback: &str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!(
            "listener of [{}] panicked in {}: {}",
            source,
            callback,
            panic_message(payload.as_ref())
        );
    }
}

/// State shared by the service handle, the update loop and the starvation ticker.
pub(crate) struct Shared<S: ClusterState> {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) leadership: Arc<dyn Leadership>,
    pub(crate) publisher: Arc<dyn Publisher<S>>,
    pub(crate) queue: PendingQueue<S>,
    pub(crate) state: RwLock<Arc<S>>,
    pub(crate) starvation: StarvationWatcher,
    pub(crate) token: CancellationToken,
}

impl<S: ClusterState> Shared<S> {
    pub(crate) fn current_state(&self) -> Arc<S> {
        Arc::clone(&self.state.read())
    }

    /// Feeds the starvation watcher with the current queue.
    pub(crate) fn check_starvation(&self) {
        let (pending, oldest) = self.queue.backlog();
        let report = self.starvation.observe(self.clock.now(), pending, oldest);
        if let Some(r) = report {
            self.bus.publish(
                Event::now(EventKind::StarvationDetected)
                    .with_duration(r.nonempty_for)
                    .with_pending(r.pending),
            );
        }
    }

    fn elapsed_since(&self, start: Duration) -> Duration {
        self.clock.now().saturating_sub(start)
    }

    fn log_execution_time(&self, took: Duration, activity: &str, summary: &str) {
        let threshold = self.cfg.slow_task_logging_threshold;
        if took > threshold {
            warn!(
                "took [{}/{}ms] to {} for [{}], which exceeds the warn threshold of [{}]",
                format_duration(took),
                took.as_millis(),
                activity,
                summary,
                format_duration(threshold)
            );
        } else {
            debug!(
                "took [{}] to {} for [{}]",
                format_duration(took),
                activity,
                summary
            );
        }
    }
}

/// Drives batches until the service is closed.
pub(crate) async fn run_loop<S: ClusterState>(shared: Arc<Shared<S>>) {
    debug!("master update loop started");
    loop {
        if shared.token.is_cancelled() {
            break;
        }
        shared.check_starvation();

        let entries = match shared.queue.take_next_batch() {
            Some(entries) => entries,
            None => {
                tokio::select! {
                    biased;
                    _ = shared.token.cancelled() => break,
                    _ = shared.queue.notified() => {}
                }
                continue;
            }
        };

        if let Some(batch) = Batch::assemble(entries) {
            run_batch(&shared, batch).await;
        }
        shared.queue.clear_executing();
    }
    debug!("master update loop stopped");
}

/// Ticker that keeps the starvation watcher fed while a batch is running.
pub(crate) async fn run_starvation_ticker<S: ClusterState>(
    shared: Arc<Shared<S>>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            _ = ticker.tick() => shared.check_starvation(),
        }
    }
}

async fn run_batch<S: ClusterState>(shared: &Shared<S>, batch: Batch<S>) {
    let Batch {
        executor,
        tasks,
        bound,
        summary,
    } = batch;

    debug!("executing cluster state update for [{}]", summary);
    shared.bus.publish(
        Event::now(EventKind::BatchStarted)
            .with_source(Arc::clone(&summary))
            .with_pending(tasks.len()),
    );

    if executor.runs_only_on_leader() && !shared.leadership.is_leader() {
        debug!("failing [{}]: local node is no longer master", summary);
        for task in &tasks {
            let err = ClusterStateError::NotMaster {
                task_source: Arc::clone(&task.source),
            };
            call_listener(&task.source, "on_failure", || {
                task.listener.on_failure(&err)
            });
        }
        shared.bus.publish(
            Event::now(EventKind::TaskRejected)
                .with_source(Arc::clone(&summary))
                .with_reason("local node is no longer master"),
        );
        return;
    }

    let previous = shared.current_state();
    let compute_start = shared.clock.now();
    let computed = bound.and_then(|b| {
        match catch_unwind(AssertUnwindSafe(|| b.execute(&previous))) {
            Ok(Ok(result)) if result.outcomes.len() != tasks.len() => {
                Err(ClusterStateError::execution(format!(
                    "executor returned [{}] outcomes for [{}] tasks",
                    result.outcomes.len(),
                    tasks.len()
                )))
            }
            Ok(result) => result,
            Err(payload) => Err(ClusterStateError::ExecutorPanicked {
                reason: panic_message(payload.as_ref()),
            }),
        }
    });
    let compute_time = shared.elapsed_since(compute_start);

    match computed {
        Err(err) => {
            trace!(
                "failed to execute cluster state update (on version: [{}], uuid: [{}]) \
                 for [{}]: {}",
                previous.version(),
                previous.state_uuid(),
                summary,
                err
            );
            shared.log_execution_time(compute_time, "compute cluster state update", &summary);

            let outcomes = vec![TaskOutcome::Failure(err.clone()); tasks.len()];
            deliver_unchanged(shared, &tasks, &outcomes, &previous, &summary);
            shared.bus.publish(
                Event::now(EventKind::ComputeFailed)
                    .with_source(Arc::clone(&summary))
                    .with_version(previous.version())
                    .with_duration(compute_time)
                    .with_reason(err.to_string()),
            );
        }
        Ok(result) if Arc::ptr_eq(&result.new_state, &previous) => {
            shared.log_execution_time(compute_time, "compute cluster state update", &summary);

            let notify_time =
                deliver_unchanged(shared, &tasks, &result.outcomes, &previous, &summary);
            shared.bus.publish(
                Event::now(EventKind::StateUnchanged)
                    .with_source(Arc::clone(&summary))
                    .with_version(previous.version())
                    .with_duration(notify_time),
            );
        }
        Ok(result) => {
            shared.log_execution_time(compute_time, "compute cluster state update", &summary);

            let change = Change {
                summary,
                tasks,
                outcomes: result.outcomes,
                previous,
                new_state: result.new_state,
                compute_time,
            };
            publish_change(shared, &*executor, change).await;
        }
    }
}

/// Delivers outcomes against an unchanged state; returns the time it took.
fn deliver_unchanged<S: ClusterState>(
    shared: &Shared<S>,
    tasks: &[BatchTask<S>],
    outcomes: &[TaskOutcome],
    current: &Arc<S>,
    summary: &str,
) -> Duration {
    let start = shared.clock.now();
    for (task, outcome) in tasks.iter().zip(outcomes) {
        match outcome {
            TaskOutcome::Success => {
                call_listener(&task.source, "cluster_state_processed", || {
                    task.listener.cluster_state_processed(current, current)
                });
                if let Some(acked) = task.listener.as_acked() {
                    TaskAckTracker::new(
                        Arc::clone(acked),
                        Arc::clone(&task.source),
                        current.version(),
                        &[],
                        shared.bus.clone(),
                    )
                    .committed(Duration::ZERO);
                }
            }
            TaskOutcome::Failure(err) => {
                call_listener(&task.source, "on_failure", || task.listener.on_failure(err));
            }
        }
    }
    let took = shared.elapsed_since(start);
    shared.log_execution_time(took, "notify listeners on unchanged cluster state", summary);
    took
}

struct Change<S> {
    summary: Arc<str>,
    tasks: Vec<BatchTask<S>>,
    outcomes: Vec<TaskOutcome>,
    previous: Arc<S>,
    new_state: Arc<S>,
    compute_time: Duration,
}

async fn publish_change<S: ClusterState>(
    shared: &Shared<S>,
    executor: &dyn ErasedExecutor<S>,
    change: Change<S>,
) {
    let Change {
        summary,
        tasks,
        outcomes,
        previous,
        new_state,
        compute_time,
    } = change;
    let version = new_state.version();
    let state_uuid: Arc<str> = Arc::from(new_state.state_uuid());

    let trackers: Vec<Option<Arc<TaskAckTracker<S>>>> = tasks
        .iter()
        .zip(&outcomes)
        .map(|(task, outcome)| match (task.listener.as_acked(), outcome) {
            (Some(acked), TaskOutcome::Success) => Some(TaskAckTracker::new(
                Arc::clone(acked),
                Arc::clone(&task.source),
                version,
                new_state.nodes(),
                shared.bus.clone(),
            )),
            _ => None,
        })
        .collect();
    let aggregator = Arc::new(AckAggregator::new(
        trackers.iter().flatten().cloned().collect(),
    ));

    *shared.state.write() = Arc::clone(&new_state);

    let publish_start = shared.clock.now();
    let event = PublicationEvent {
        summary: Arc::clone(&summary),
        old_state: Arc::clone(&previous),
        new_state: Arc::clone(&new_state),
        compute_duration: compute_time,
    };
    let ack: Arc<dyn AckListener> = aggregator.clone();
    let published = AssertUnwindSafe(shared.publisher.publish(event, ack))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(PublishError::transport(format!(
                "publisher panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
    let commit_duration = shared.elapsed_since(publish_start);

    match published {
        Ok(()) => {
            let notify_start = shared.clock.now();
            for (task, outcome) in tasks.iter().zip(&outcomes) {
                match outcome {
                    TaskOutcome::Success => {
                        call_listener(&task.source, "cluster_state_processed", || {
                            task.listener.cluster_state_processed(&previous, &new_state)
                        })
                    }
                    TaskOutcome::Failure(err) => {
                        call_listener(&task.source, "on_failure", || task.listener.on_failure(err))
                    }
                }
            }
            aggregator.committed(commit_duration);

            let outcome = PublicationOutcome {
                summary: Arc::clone(&summary),
                version,
                state_uuid: Arc::clone(&state_uuid),
                committed: true,
                commit_duration,
                per_node_ack_errors: aggregator.node_acks(),
                failure: None,
            };
            call_listener(&summary, "on_publication_complete", || {
                executor.on_publication_complete(&outcome)
            });

            let took = shared.elapsed_since(notify_start);
            shared.log_execution_time(
                took,
                &format!(
                    "notify listeners on successful publication of cluster state \
                     (version: {}, uuid: {})",
                    version, state_uuid
                ),
                &summary,
            );
            shared.bus.publish(
                Event::now(EventKind::StatePublished)
                    .with_source(Arc::clone(&summary))
                    .with_version(version)
                    .with_duration(took),
            );
        }
        Err(publish_err) => {
            *shared.state.write() = Arc::clone(&previous);
            aggregator.failed();

            if matches!(publish_err, PublishError::FailedToCommit { .. }) {
                warn!(
                    "failing [{}]: failed to commit cluster state version [{}]",
                    summary, version
                );
            }
            let err = ClusterStateError::Publication(publish_err.clone());
            for task in &tasks {
                call_listener(&task.source, "on_failure", || {
                    task.listener.on_failure(&err)
                });
            }

            let outcome = PublicationOutcome {
                summary: Arc::clone(&summary),
                version,
                state_uuid: Arc::clone(&state_uuid),
                committed: false,
                commit_duration,
                per_node_ack_errors: aggregator.node_acks(),
                failure: Some(publish_err.clone()),
            };
            call_listener(&summary, "on_publication_complete", || {
                executor.on_publication_complete(&outcome)
            });

            let took = shared.elapsed_since(publish_start);
            if took > shared.cfg.slow_task_logging_threshold {
                warn!(
                    "took [{}] and then failed to publish updated cluster state \
                     (version: {}, uuid: {}) for [{}]: {}",
                    format_duration(took),
                    version,
                    state_uuid,
                    summary,
                    publish_err
                );
            } else {
                debug!(
                    "took [{}] and then failed to publish updated cluster state \
                     (version: {}, uuid: {}) for [{}]: {}",
                    format_duration(took),
                    version,
                    state_uuid,
                    summary,
                    publish_err
                );
            }
            shared.bus.publish(
                Event::now(EventKind::PublicationFailed)
                    .with_source(Arc::clone(&summary))
                    .with_version(version)
                    .with_duration(took)
                    .with_reason(err.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_panic_is_contained() {
        let mut ran_after = false;
        call_listener("boom", "on_failure", || panic!("listener exploded"));
        call_listener("fine", "on_failure", || ran_after = true);
        assert!(ran_after);
    }
}
