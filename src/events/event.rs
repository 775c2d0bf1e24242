//! # Runtime events emitted by the master service.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Batch events**: one per update loop iteration (started, outcome)
//! - **Ack events**: per-task ack resolution, after the loop has moved on
//! - **Service events**: starvation reports and shutdown
//!
//! The [`Event`] struct carries the batch summary, state version, timings and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use masterloop::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::StatePublished)
//!     .with_source("create-index")
//!     .with_version(7)
//!     .with_duration(Duration::from_millis(40));
//!
//! assert_eq!(ev.kind, EventKind::StatePublished);
//! assert_eq!(ev.version, Some(7));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Batch events ===
    /// Tasks were failed without running: at submission (not leader, service
    /// closed) or when their batch found the node no longer leader.
    ///
    /// Sets: `source`, `reason`
    TaskRejected,

    /// The loop selected a batch and is about to execute it.
    ///
    /// Sets: `source` (batch summary), `pending` (batch size)
    BatchStarted,

    /// The executor failed or panicked; every task of the batch failed.
    ///
    /// Sets: `source`, `version` (unchanged state), `duration` (compute time), `reason`
    ComputeFailed,

    /// The executor returned the same state; nothing was published.
    ///
    /// Sets: `source`, `version`, `duration` (notify time)
    StateUnchanged,

    /// A new state was committed and listeners were notified.
    ///
    /// Sets: `source`, `version`, `duration` (notify time after the commit)
    StatePublished,

    /// Publication failed; the state was rolled back.
    ///
    /// Sets: `source`, `version` (of the rejected state), `duration`, `reason`
    PublicationFailed,

    // === Ack events ===
    /// Every node an acked task waited for has acknowledged.
    ///
    /// Sets: `source`, `version`, `reason` (first node error, if any)
    AllNodesAcked,

    /// An acked task's ack timeout elapsed first.
    ///
    /// Sets: `source`, `version`, `duration` (ack timeout)
    AckTimedOut,

    // === Service events ===
    /// The queue has been non-empty longer than the starvation threshold.
    ///
    /// Sets: `duration` (non-empty time), `pending` (queue length)
    StarvationDetected,

    /// The update loop stopped; queued tasks were failed.
    ///
    /// Sets: `pending` (number of failed queued tasks)
    ServiceClosed,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Task source or batch summary.
    pub source: Option<Arc<str>>,
    /// Version of the state the event refers to.
    pub version: Option<i64>,
    /// Measured duration (meaning depends on `kind`).
    pub duration: Option<Duration>,
    /// Human-readable reason (errors, rejection details).
    pub reason: Option<Arc<str>>,
    /// Number of tasks involved (batch size, queue length).
    pub pending: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            source: None,
            version: None,
            duration: None,
            reason: None,
            pending: None,
        }
    }

    /// Attaches the task source or batch summary.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a state version.
    #[inline]
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Attaches a duration.
    #[inline]
    pub fn with_duration(mut self, d: Duration) -> Self {
        self.duration = Some(d);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task count.
    #[inline]
    pub fn with_pending(mut self, n: usize) -> Self {
        self.pending = Some(n);
        self
    }

    /// True for the events that end one update loop iteration.
    #[inline]
    pub fn is_batch_outcome(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ComputeFailed
                | EventKind::StateUnchanged
                | EventKind::StatePublished
                | EventKind::PublicationFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::now(EventKind::BatchStarted);
        let b = Event::now(EventKind::BatchStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_batch_outcome_kinds() {
        assert!(Event::now(EventKind::StatePublished).is_batch_outcome());
        assert!(Event::now(EventKind::ComputeFailed).is_batch_outcome());
        assert!(!Event::now(EventKind::BatchStarted).is_batch_outcome());
        assert!(!Event::now(EventKind::AckTimedOut).is_batch_outcome());
    }
}
