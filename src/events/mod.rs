//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the update loop, the ack
//! trackers and the starvation ticker.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! Events complement the `tracing` log lines; they carry the same facts in a
//! structured form for observers and tests.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
