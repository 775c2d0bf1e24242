//! # Acknowledgement tracking.
//!
//! One [`AckAggregator`] is created per published state and handed to the
//! [`Publisher`](crate::Publisher) as its [`AckListener`]. It fans every report
//! out to one [`TaskAckTracker`] per acked task that succeeded in the batch.
//!
//! ```text
//! Publisher ──on_commit / on_node_ack──► AckAggregator
//!                                          ├─► TaskAckTracker (task 1) ──► on_all_nodes_acked | on_ack_timeout
//!                                          └─► TaskAckTracker (task 2) ──► ...
//!
//! loop, after the commit decision:
//!   Ok   ─► aggregator.committed(measured)  → trackers arm their timers
//!   Err  ─► aggregator.failed()             → trackers resolve silently
//! ```
//!
//! ## Rules
//! - A tracker resolves at most once (single `resolved` flag).
//! - All-acked needs both an empty remaining node set and a successful commit.
//! - The timer runs for `ack_timeout - commit_time`; nothing left means an
//!   immediate timeout.
//! - Unknown or repeated node acks are ignored; the first node error is kept.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug};

use super::publication::AckListener;
use super::runner::call_listener;
use crate::cluster::NodeId;
use crate::error::{ClusterStateError, PublishError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::AckedTaskListener;
use crate::time::format_duration;

struct TrackerInner {
    remaining: BTreeSet<NodeId>,
    first_error: Option<ClusterStateError>,
    committed: bool,
    timer: Option<AbortHandle>,
}

/// Waits for the acks one task needs.
pub(crate) struct TaskAckTracker<S> {
    listener: Arc<dyn AckedTaskListener<S>>,
    source: Arc<str>,
    version: i64,
    ack_timeout: Duration,
    inner: Mutex<TrackerInner>,
    resolved: AtomicBool,
    bus: Bus,
}

impl<S: 'static> TaskAckTracker<S> {
    /// Expects every node of `nodes` the listener must hear from.
    pub(crate) fn new(
        listener: Arc<dyn AckedTaskListener<S>>,
        source: Arc<str>,
        version: i64,
        nodes: &[NodeId],
        bus: Bus,
    ) -> Arc<Self> {
        let remaining = nodes
            .iter()
            .filter(|n| listener.must_ack(n))
            .cloned()
            .collect();
        let ack_timeout = listener.ack_timeout();
        Arc::new(Self {
            listener,
            source,
            version,
            ack_timeout,
            inner: Mutex::new(TrackerInner {
                remaining,
                first_error: None,
                committed: false,
                timer: None,
            }),
            resolved: AtomicBool::new(false),
            bus,
        })
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    fn on_node_ack(&self, node: &NodeId, error: Option<&PublishError>) {
        if self.is_resolved() {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.remaining.remove(node) {
            return;
        }
        if let Some(e) = error {
            inner
                .first_error
                .get_or_insert_with(|| ClusterStateError::Publication(e.clone()));
        }
        if inner.remaining.is_empty() && inner.committed {
            let first_error = inner.first_error.take();
            let timer = inner.timer.take();
            drop(inner);
            if let Some(timer) = timer {
                timer.abort();
            }
            self.resolve_acked(first_error);
        }
    }

    /// The state is committed; resolve now or arm the ack timer.
    pub(crate) fn committed(self: &Arc<Self>, commit_time: Duration) {
        let mut inner = self.inner.lock();
        inner.committed = true;

        if inner.remaining.is_empty() {
            let first_error = inner.first_error.take();
            drop(inner);
            self.resolve_acked(first_error);
            return;
        }

        match self
            .ack_timeout
            .checked_sub(commit_time)
            .filter(|left| !left.is_zero())
        {
            None => {
                drop(inner);
                self.resolve_timeout();
            }
            Some(left) => {
                let tracker = Arc::clone(self);
                let handle = tokio::spawn(
                    async move {
                        tokio::time::sleep(left).await;
                        tracker.resolve_timeout();
                    }
                    .in_current_span(),
                );
                inner.timer = Some(handle.abort_handle());
            }
        }
    }

    /// The state was not committed; no ack callback will ever fire.
    pub(crate) fn failed(&self) {
        self.resolved.store(true, Ordering::Release);
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }

    fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn resolve_acked(&self, first_error: Option<ClusterStateError>) {
        if !self.claim() {
            return;
        }
        debug!(
            "all nodes acked cluster state version [{}] for [{}]",
            self.version, self.source
        );
        call_listener(&self.source, "on_all_nodes_acked", || {
            self.listener.on_all_nodes_acked(first_error.as_ref())
        });

        let mut ev = Event::now(EventKind::AllNodesAcked)
            .with_source(Arc::clone(&self.source))
            .with_version(self.version);
        if let Some(e) = &first_error {
            ev = ev.with_reason(e.to_string());
        }
        self.bus.publish(ev);
    }

    fn resolve_timeout(&self) {
        if !self.claim() {
            return;
        }
        debug!(
            "timed out after [{}] waiting for acks of cluster state version [{}] for [{}]",
            format_duration(self.ack_timeout),
            self.version,
            self.source
        );
        call_listener(&self.source, "on_ack_timeout", || {
            self.listener.on_ack_timeout()
        });
        self.bus.publish(
            Event::now(EventKind::AckTimedOut)
                .with_source(Arc::clone(&self.source))
                .with_version(self.version)
                .with_duration(self.ack_timeout),
        );
    }
}

/// [`AckListener`] of one publication.
pub(crate) struct AckAggregator<S> {
    trackers: Vec<Arc<TaskAckTracker<S>>>,
    commit_time: Mutex<Option<Duration>>,
    node_acks: Mutex<BTreeMap<NodeId, Option<PublishError>>>,
}

impl<S: 'static> AckAggregator<S> {
    pub(crate) fn new(trackers: Vec<Arc<TaskAckTracker<S>>>) -> Self {
        Self {
            trackers,
            commit_time: Mutex::new(None),
            node_acks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Arms every tracker; returns the commit time used.
    ///
    /// `measured` is used when the transport never reported `on_commit`.
    pub(crate) fn committed(&self, measured: Duration) -> Duration {
        let commit_time = (*self.commit_time.lock()).unwrap_or(measured);
        for tracker in &self.trackers {
            tracker.committed(commit_time);
        }
        commit_time
    }

    pub(crate) fn failed(&self) {
        for tracker in &self.trackers {
            tracker.failed();
        }
    }

    /// Node acks received so far.
    pub(crate) fn node_acks(&self) -> BTreeMap<NodeId, Option<PublishError>> {
        self.node_acks.lock().clone()
    }
}

impl<S: 'static> AckListener for AckAggregator<S> {
    fn on_commit(&self, commit_time: Duration) {
        self.commit_time.lock().get_or_insert(commit_time);
    }

    fn on_node_ack(&self, node: &NodeId, error: Option<PublishError>) {
        for tracker in &self.trackers {
            tracker.on_node_ack(node, error.as_ref());
        }
        self.node_acks.lock().entry(node.clone()).or_insert(error);
    }
}
