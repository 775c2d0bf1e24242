//! # Collaborator contracts for the replicated state and leadership.
//!
//! The scheduler never looks inside the state it manages. It only needs:
//! - [`ClusterState`]: version and uuid (for logs) and the member nodes (for acks),
//! - [`Leadership`]: whether this node is currently the elected leader.
//!
//! States are always handled as `Arc<S>`. A new state is a new `Arc`; the
//! "unchanged" signal from an executor is pointer identity ([`Arc::ptr_eq`]),
//! never value equality.

use std::fmt;
use std::sync::Arc;

/// Immutable, versioned snapshot of the replicated state.
pub trait ClusterState: Send + Sync + 'static {
    /// Monotonic version of this snapshot.
    fn version(&self) -> i64;

    /// Unique id of this snapshot.
    fn state_uuid(&self) -> &str;

    /// Nodes that are members of the cluster in this snapshot.
    ///
    /// Acked tasks wait for every node here for which
    /// [`AckedTaskListener::must_ack`](crate::AckedTaskListener::must_ack) holds.
    fn nodes(&self) -> &[NodeId];
}

/// Identifier of a cluster node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Answers "am I the leader?".
///
/// Implemented for every `Fn() -> bool`, so a closure over an `AtomicBool`
/// or a consensus handle is enough:
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use masterloop::Leadership;
///
/// let flag = Arc::new(AtomicBool::new(true));
/// let leader = { let flag = flag.clone(); move || flag.load(Ordering::Acquire) };
/// assert!(leader.is_leader());
/// ```
pub trait Leadership: Send + Sync + 'static {
    fn is_leader(&self) -> bool;
}

impl<F> Leadership for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn is_leader(&self) -> bool {
        self()
    }
}
