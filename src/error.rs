//! Error types used by the master service, its tasks and the publish transport.
//!
//! This module defines three error enums:
//!
//! - [`ClusterStateError`]: delivered to task listeners when a task does not complete.
//! - [`PublishError`]: raised by the [`Publisher`](crate::Publisher) transport.
//! - [`ServiceError`]: lifecycle errors of the [`MasterService`](crate::MasterService) itself.
//!
//! All types provide `as_label` for logs/metrics. `ClusterStateError` and
//! `PublishError` are `Clone` because one failure is fanned out to every task
//! of a batch.

use std::sync::Arc;

use thiserror::Error;

use crate::cluster::NodeId;

/// # Errors delivered to task listeners.
///
/// Every task receives either `cluster_state_processed` or exactly one of
/// these through `on_failure`.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ClusterStateError {
    /// The local node is not the elected leader.
    #[error("no longer master. source: [{task_source}]")]
    NotMaster {
        /// Source of the rejected task.
        task_source: Arc<str>,
    },

    /// The batch executor returned an error; every task of the batch fails with it.
    #[error("failed to execute cluster state update: {reason}")]
    Execution {
        /// The underlying error message.
        reason: String,
    },

    /// The batch executor panicked.
    #[error("cluster state executor panicked: {reason}")]
    ExecutorPanicked {
        /// Panic payload rendered as text.
        reason: String,
    },

    /// The executor rejected this particular task while accepting others.
    #[error("task rejected: {reason}")]
    Rejected {
        /// The underlying error message.
        reason: String,
    },

    /// Publication of the new state failed; the state was rolled back.
    #[error("failed to publish cluster state: {0}")]
    Publication(#[from] PublishError),

    /// The service was closed before the task could run.
    #[error("master service is closed")]
    Closed,
}

impl ClusterStateError {
    /// Shorthand for [`ClusterStateError::Execution`].
    pub fn execution(reason: impl Into<String>) -> Self {
        ClusterStateError::Execution {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ClusterStateError::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        ClusterStateError::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use masterloop::ClusterStateError;
    ///
    /// let err = ClusterStateError::rejected("duplicate index");
    /// assert_eq!(err.as_label(), "task_rejected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ClusterStateError::NotMaster { .. } => "not_master",
            ClusterStateError::Execution { .. } => "execution_failed",
            ClusterStateError::ExecutorPanicked { .. } => "executor_panicked",
            ClusterStateError::Rejected { .. } => "task_rejected",
            ClusterStateError::Publication(_) => "publication_failed",
            ClusterStateError::Closed => "service_closed",
        }
    }

    /// True if the failure happened while committing the new state.
    pub fn is_commit_failure(&self) -> bool {
        matches!(
            self,
            ClusterStateError::Publication(PublishError::FailedToCommit { .. })
        )
    }
}

/// # Errors produced by the publish transport.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The cluster did not agree on the new state.
    #[error("failed to commit cluster state: {reason}")]
    FailedToCommit {
        /// The underlying error message.
        reason: String,
    },

    /// A node failed to apply a committed state.
    #[error("node [{node}] failed to apply cluster state: {reason}")]
    NodeFailed {
        /// Node reporting the failure.
        node: NodeId,
        /// The underlying error message.
        reason: String,
    },

    /// Any other transport failure (connection loss, serialization, panic).
    #[error("transport error: {reason}")]
    Transport {
        /// The underlying error message.
        reason: String,
    },
}

impl PublishError {
    /// Shorthand for [`PublishError::FailedToCommit`].
    pub fn failed_to_commit(reason: impl Into<String>) -> Self {
        PublishError::FailedToCommit {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`PublishError::NodeFailed`].
    pub fn node_failed(node: NodeId, reason: impl Into<String>) -> Self {
        PublishError::NodeFailed {
            node,
            reason: reason.into(),
        }
    }

    /// Shorthand for [`PublishError::Transport`].
    pub fn transport(reason: impl Into<String>) -> Self {
        PublishError::Transport {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::FailedToCommit { .. } => "failed_to_commit",
            PublishError::NodeFailed { .. } => "node_failed",
            PublishError::Transport { .. } => "transport",
        }
    }
}

/// # Errors produced by the service lifecycle.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    /// `start()` was called twice.
    #[error("master service already started")]
    AlreadyStarted,

    /// The service has been closed and cannot be started again.
    #[error("master service is closed")]
    Closed,
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::AlreadyStarted => "service_already_started",
            ServiceError::Closed => "service_closed",
        }
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_failure_detection() {
        let err = ClusterStateError::from(PublishError::failed_to_commit("no quorum"));
        assert!(err.is_commit_failure());
        assert_eq!(err.as_label(), "publication_failed");

        let err = ClusterStateError::from(PublishError::transport("closed"));
        assert!(!err.is_commit_failure());
    }

    #[test]
    fn test_not_master_message() {
        let err = ClusterStateError::NotMaster {
            task_source: "put-mapping".into(),
        };
        assert_eq!(err.to_string(), "no longer master. source: [put-mapping]");
    }

    #[test]
    fn test_panic_message_variants() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic payload");
    }
}
