use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::publication::Publisher;
use super::queue::PendingQueue;
use super::runner::Shared;
use super::service::MasterService;
use super::starvation::StarvationWatcher;
use crate::cluster::{ClusterState, Leadership};
use crate::config::Config;
use crate::events::Bus;
use crate::time::{Clock, SystemClock};

/// Builder for constructing a [`MasterService`] with optional collaborators.
///
/// Defaults: [`Config::default`], always leader, [`SystemClock`].
pub struct MasterServiceBuilder<S: ClusterState> {
    initial_state: Arc<S>,
    publisher: Arc<dyn Publisher<S>>,
    cfg: Config,
    leadership: Arc<dyn Leadership>,
    clock: Arc<dyn Clock>,
}

impl<S: ClusterState> MasterServiceBuilder<S> {
    pub(crate) fn new(initial_state: Arc<S>, publisher: Arc<dyn Publisher<S>>) -> Self {
        Self {
            initial_state,
            publisher,
            cfg: Config::default(),
            leadership: Arc::new(|| true),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Replaces the default configuration.
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets the leadership check used at submission and before each batch.
    pub fn with_leadership(mut self, leadership: impl Leadership) -> Self {
        self.leadership = Arc::new(leadership);
        self
    }

    /// Sets the time source for durations, thresholds and queue ages.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the service. Call [`MasterService::start`] to run it.
    pub fn build(self) -> Arc<MasterService<S>> {
        let shared = Arc::new(Shared {
            bus: Bus::new(self.cfg.bus_capacity_clamped()),
            starvation: StarvationWatcher::new(self.cfg.starvation_logging_threshold),
            clock: self.clock,
            leadership: self.leadership,
            publisher: self.publisher,
            queue: PendingQueue::new(),
            state: parking_lot::RwLock::new(self.initial_state),
            token: CancellationToken::new(),
            cfg: self.cfg,
        });
        Arc::new(MasterService::from_shared(shared))
    }
}
