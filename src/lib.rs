//! # masterloop
//!
//! **masterloop** is the update scheduler of an elected cluster leader.
//!
//! Callers on any thread submit state-mutation tasks. A single update loop
//! takes them off a priority queue one executor batch at a time, computes the
//! next immutable state, hands it to the publish transport and waits for the
//! commit decision before telling each task how it went. Acked tasks are
//! additionally told when every node applied the state, or that they gave up
//! waiting.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   caller A        caller B        caller C
//!      │ submit_*       │               │
//!      ▼                ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  PendingQueue  (priority, insert order)                           │
//! │  IMMEDIATE > URGENT > HIGH > NORMAL > LOW > LANGUID               │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                │ take_next_batch(): head + same executor
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  update loop (one tokio task, sole writer of the current state)   │
//! │   ├─ BatchExecutor::execute(current, tasks) → new state, outcomes │
//! │   ├─ Publisher::publish(old, new, AckAggregator) → commit?        │
//! │   └─ listeners: cluster_state_processed | on_failure              │
//! └──────┬─────────────────────────────────┬──────────────────────────┘
//!        │                                 │
//!        ▼                                 ▼
//!  TaskAckTracker (per acked task)   Bus (broadcast events)
//!   on_all_nodes_acked | on_ack_timeout
//! ```
//!
//! ### Batch lifecycle
//! ```text
//! QUEUED ──► SELECTED ──► EXECUTED ──┬─ unchanged ───────────────► TERMINAL
//!                                    └─ changed ──► PUBLISHING ──► TERMINAL
//! ```
//!
//! ## Features
//! | Area              | Description                                             | Key types / traits                                 |
//! |-------------------|---------------------------------------------------------|----------------------------------------------------|
//! | **Service**       | Submission, lifecycle, introspection.                   | [`MasterService`], [`MasterServiceBuilder`]        |
//! | **Tasks**         | Batched executors and single update tasks.              | [`BatchExecutor`], [`ClusterStateUpdateTask`]      |
//! | **Listeners**     | Per-task outcome and ack callbacks.                     | [`TaskListener`], [`AckedTaskListener`]            |
//! | **Transport**     | Publication and acknowledgement contract.               | [`Publisher`], [`AckListener`]                     |
//! | **Events**        | Structured runtime events next to the `tracing` logs.   | [`Event`], [`EventKind`]                           |
//! | **Errors**        | Typed errors for tasks, transport and lifecycle.        | [`ClusterStateError`], [`PublishError`]            |
//! | **Configuration** | Slow-task and starvation thresholds.                    | [`Config`]                                         |
//!
//! ## Logging
//! Everything is reported through `tracing` events; install any subscriber
//! in the embedding binary. Slow steps log at WARN, everything else at DEBUG
//! or TRACE.
mod cluster;
mod config;
mod core;
mod error;
mod events;
mod tasks;
mod time;

// ---- Public re-exports ----

pub use cluster::{ClusterState, Leadership, NodeId};
pub use config::Config;
pub use core::{
    AckListener, MasterService, MasterServiceBuilder, PendingTask, PublicationEvent,
    PublicationOutcome, Publisher,
};
pub use error::{ClusterStateError, PublishError, ServiceError};
pub use events::{Bus, Event, EventKind};
pub use tasks::{
    AckedTaskListener, BatchExecutor, ClusterStateTaskListener, ClusterStateUpdateTask,
    ClusterTasksResult, ClusterTasksResultBuilder, Priority, TaskListener, TaskOutcome,
};
pub use time::{Clock, ManualClock, SystemClock, format_duration};
