//! # Publish transport contract.
//!
//! The update loop hands every changed state to a [`Publisher`] and waits for
//! the commit decision (the returned `Result`). While publishing, the transport
//! reports progress through the [`AckListener`] it was given:
//!
//! ```text
//! loop ──publish(event, ack)──► Publisher ──► cluster
//!                                  │
//!          ack.on_commit(t) ◄──────┤   (optional, before returning Ok)
//!          ack.on_node_ack(n, e) ◄─┘   (any time, also after returning)
//! ```
//!
//! Node acks may keep arriving after `publish` returned; the loop has moved on
//! by then and only the per-task ack trackers observe them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::NodeId;
use crate::error::PublishError;

/// A new state on its way to the cluster.
pub struct PublicationEvent<S> {
    /// Summary of the batch that produced the state.
    pub summary: Arc<str>,
    pub old_state: Arc<S>,
    pub new_state: Arc<S>,
    /// Time the executor took to compute `new_state`.
    pub compute_duration: Duration,
}

impl<S> Clone for PublicationEvent<S> {
    fn clone(&self) -> Self {
        Self {
            summary: Arc::clone(&self.summary),
            old_state: Arc::clone(&self.old_state),
            new_state: Arc::clone(&self.new_state),
            compute_duration: self.compute_duration,
        }
    }
}

/// Receives commit and per-node acknowledgement reports from the transport.
pub trait AckListener: Send + Sync + 'static {
    /// The cluster committed the state after `commit_time`.
    fn on_commit(&self, commit_time: Duration);

    /// `node` applied the state (`None`) or failed to (`Some(error)`).
    fn on_node_ack(&self, node: &NodeId, error: Option<PublishError>);
}

/// Replicates a new state to the cluster.
///
/// `Ok(())` means the state is committed; `Err` means it is not and the
/// service rolls back. A panic is treated as `Err`.
#[async_trait]
pub trait Publisher<S: Send + Sync + 'static>: Send + Sync + 'static {
    async fn publish(
        &self,
        event: PublicationEvent<S>,
        ack: Arc<dyn AckListener>,
    ) -> Result<(), PublishError>;
}

/// What happened to one published state; handed to the batch executor.
#[derive(Clone, Debug)]
pub struct PublicationOutcome {
    pub summary: Arc<str>,
    pub version: i64,
    pub state_uuid: Arc<str>,
    pub committed: bool,
    /// Time from the start of publication to the commit decision.
    pub commit_duration: Duration,
    /// Node acks received by the time the commit decision was known.
    pub per_node_ack_errors: BTreeMap<NodeId, Option<PublishError>>,
    /// Why the state was not committed.
    pub failure: Option<PublishError>,
}

impl PublicationOutcome {
    /// Nodes that acknowledged with an error.
    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.per_node_ack_errors
            .iter()
            .filter(|(_, e)| e.is_some())
            .map(|(n, _)| n)
    }
}
