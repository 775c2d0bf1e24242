//! # Task outcome listeners.
//!
//! Every submitted task carries a [`TaskListener`], a tagged capability set:
//!
//! ```text
//! TaskListener::Basic(ClusterStateTaskListener)   on_failure | cluster_state_processed
//! TaskListener::Acked(AckedTaskListener)          ... + on_all_nodes_acked | on_ack_timeout
//! ```
//!
//! ## Rules
//! - Exactly one of `on_failure` / `cluster_state_processed` is called per task,
//!   after the commit decision is final.
//! - For acked tasks that succeeded, exactly one of `on_all_nodes_acked` /
//!   `on_ack_timeout` follows (possibly after the loop has moved on).
//! - Listener panics are caught and logged by the service; they never affect
//!   other listeners or the update loop.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::NodeId;
use crate::error::ClusterStateError;

/// Outcome callbacks of a single task.
pub trait ClusterStateTaskListener<S>: Send + Sync + 'static {
    /// The task did not complete.
    fn on_failure(&self, error: &ClusterStateError);

    /// The task completed; `new` is the committed state, or `old` itself when
    /// the batch did not change the state.
    fn cluster_state_processed(&self, old: &Arc<S>, new: &Arc<S>) {
        let _ = (old, new);
    }
}

/// Listener that also waits for nodes to acknowledge the committed state.
pub trait AckedTaskListener<S>: ClusterStateTaskListener<S> {
    /// How long after the commit to wait for acks.
    fn ack_timeout(&self) -> Duration;

    /// Whether `node` has to acknowledge before the task counts as acked.
    fn must_ack(&self, node: &NodeId) -> bool {
        let _ = node;
        true
    }

    /// Every expected node acked; carries the first node-level error, if any.
    fn on_all_nodes_acked(&self, error: Option<&ClusterStateError>);

    /// The ack timeout elapsed before every expected node acked.
    fn on_ack_timeout(&self);
}

/// Listener capability set attached to a task.
pub enum TaskListener<S> {
    Basic(Arc<dyn ClusterStateTaskListener<S>>),
    Acked(Arc<dyn AckedTaskListener<S>>),
}

impl<S: 'static> TaskListener<S> {
    pub fn basic<L: ClusterStateTaskListener<S>>(listener: Arc<L>) -> Self {
        TaskListener::Basic(listener)
    }

    pub fn acked<L: AckedTaskListener<S>>(listener: Arc<L>) -> Self {
        TaskListener::Acked(listener)
    }

    pub fn on_failure(&self, error: &ClusterStateError) {
        match self {
            TaskListener::Basic(l) => l.on_failure(error),
            TaskListener::Acked(l) => l.on_failure(error),
        }
    }

    pub fn cluster_state_processed(&self, old: &Arc<S>, new: &Arc<S>) {
        match self {
            TaskListener::Basic(l) => l.cluster_state_processed(old, new),
            TaskListener::Acked(l) => l.cluster_state_processed(old, new),
        }
    }

    /// The ack capability, if this listener has one.
    pub fn as_acked(&self) -> Option<&Arc<dyn AckedTaskListener<S>>> {
        match self {
            TaskListener::Basic(_) => None,
            TaskListener::Acked(l) => Some(l),
        }
    }
}

impl<S> Clone for TaskListener<S> {
    fn clone(&self) -> Self {
        match self {
            TaskListener::Basic(l) => TaskListener::Basic(Arc::clone(l)),
            TaskListener::Acked(l) => TaskListener::Acked(Arc::clone(l)),
        }
    }
}
