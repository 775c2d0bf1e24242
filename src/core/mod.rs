//! Runtime core: queue, update loop and publication.
//!
//! The public API from this module is [`MasterService`] (built through
//! [`MasterServiceBuilder`]) plus the publish transport contract.
//!
//! Internal modules:
//! - [`queue`]: pending tasks ordered by priority, taken one executor batch at a time;
//! - [`batch`]: type erasure of executors and task payloads;
//! - [`runner`]: the update loop, slow-task logging and the starvation ticker;
//! - [`ack`]: per-task ack trackers behind one [`AckListener`] per publication;
//! - [`starvation`]: reports a queue that stays non-empty for too long;
//! - [`service`]: submission, introspection and lifecycle.

mod ack;
mod batch;
mod builder;
mod publication;
mod queue;
mod runner;
mod service;
mod starvation;

pub use builder::MasterServiceBuilder;
pub use publication::{AckListener, PublicationEvent, PublicationOutcome, Publisher};
pub use queue::PendingTask;
pub use service::MasterService;
