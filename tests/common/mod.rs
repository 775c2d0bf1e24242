#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use masterloop::{
    AckListener, AckedTaskListener, BatchExecutor, ClusterState, ClusterStateError,
    ClusterStateTaskListener, ClusterTasksResult, ClusterTasksResultBuilder, Event, EventKind,
    ManualClock, NodeId, PublicationEvent, PublicationOutcome, PublishError, Publisher,
    TaskListener,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TestState {
    pub version: i64,
    pub uuid: String,
    pub nodes: Vec<NodeId>,
    pub entries: Vec<String>,
}

impl TestState {
    pub fn initial(nodes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            version: 0,
            uuid: "state-0".to_string(),
            nodes: nodes.iter().map(|n| NodeId::from(*n)).collect(),
            entries: Vec::new(),
        })
    }

    pub fn with_entries(&self, added: impl IntoIterator<Item = String>) -> Arc<Self> {
        let version = self.version + 1;
        let mut entries = self.entries.clone();
        entries.extend(added);
        Arc::new(Self {
            version,
            uuid: format!("state-{version}"),
            nodes: self.nodes.clone(),
            entries,
        })
    }
}

impl ClusterState for TestState {
    fn version(&self) -> i64 {
        self.version
    }

    fn state_uuid(&self) -> &str {
        &self.uuid
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

// ---- Publisher ----

#[derive(Clone, Debug)]
pub enum PublishMode {
    /// Commit, then ack from every node of the new state.
    CommitAndAck,
    /// Commit; nobody acks.
    CommitSilently,
    FailCommit(&'static str),
    Panic,
}

pub struct RecordingPublisher {
    mode: Mutex<PublishMode>,
    published: Mutex<Vec<Arc<TestState>>>,
    round_trip: Mutex<Option<(Arc<ManualClock>, Duration)>>,
}

impl RecordingPublisher {
    pub fn new(mode: PublishMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            published: Mutex::new(Vec::new()),
            round_trip: Mutex::new(None),
        })
    }

    /// Every publish advances `clock` by `by` before deciding the commit.
    pub fn take_time(&self, clock: Arc<ManualClock>, by: Duration) {
        *self.round_trip.lock() = Some((clock, by));
    }

    pub fn set_mode(&self, mode: PublishMode) {
        *self.mode.lock() = mode;
    }

    pub fn published(&self) -> Vec<Arc<TestState>> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher<TestState> for RecordingPublisher {
    async fn publish(
        &self,
        event: PublicationEvent<TestState>,
        ack: Arc<dyn AckListener>,
    ) -> Result<(), PublishError> {
        self.published.lock().push(Arc::clone(&event.new_state));
        if let Some((clock, by)) = self.round_trip.lock().as_ref() {
            clock.advance(*by);
        }
        let mode = self.mode.lock().clone();
        match mode {
            PublishMode::CommitAndAck => {
                ack.on_commit(Duration::from_millis(1));
                for node in event.new_state.nodes() {
                    ack.on_node_ack(node, None);
                }
                Ok(())
            }
            PublishMode::CommitSilently => Ok(()),
            PublishMode::FailCommit(reason) => Err(PublishError::failed_to_commit(reason)),
            PublishMode::Panic => panic!("transport exploded"),
        }
    }
}

// ---- Listener ----

#[derive(Clone, Debug)]
pub enum Outcome {
    Processed {
        source: String,
        old: Arc<TestState>,
        new: Arc<TestState>,
    },
    Failed {
        source: String,
        error: ClusterStateError,
    },
    AllAcked {
        source: String,
        error: Option<String>,
    },
    AckTimedOut {
        source: String,
    },
}

impl Outcome {
    pub fn source(&self) -> &str {
        match self {
            Outcome::Processed { source, .. }
            | Outcome::Failed { source, .. }
            | Outcome::AllAcked { source, .. }
            | Outcome::AckTimedOut { source } => source,
        }
    }

    pub fn error_label(&self) -> Option<&'static str> {
        match self {
            Outcome::Failed { error, .. } => Some(error.as_label()),
            _ => None,
        }
    }
}

pub struct Recorder {
    source: String,
    tx: mpsc::UnboundedSender<Outcome>,
    ack_timeout: Duration,
    panic_on_processed: bool,
}

pub type Outcomes = mpsc::UnboundedReceiver<Outcome>;

pub fn outcomes() -> (mpsc::UnboundedSender<Outcome>, Outcomes) {
    mpsc::unbounded_channel()
}

impl Recorder {
    pub fn basic(tx: &mpsc::UnboundedSender<Outcome>, source: &str) -> TaskListener<TestState> {
        TaskListener::basic(Arc::new(Self::new(tx, source, Duration::ZERO)))
    }

    pub fn acked(
        tx: &mpsc::UnboundedSender<Outcome>,
        source: &str,
        ack_timeout: Duration,
    ) -> TaskListener<TestState> {
        TaskListener::acked(Arc::new(Self::new(tx, source, ack_timeout)))
    }

    pub fn panicking(tx: &mpsc::UnboundedSender<Outcome>, source: &str) -> TaskListener<TestState> {
        TaskListener::basic(Arc::new(Self {
            panic_on_processed: true,
            ..Self::new(tx, source, Duration::ZERO)
        }))
    }

    fn new(tx: &mpsc::UnboundedSender<Outcome>, source: &str, ack_timeout: Duration) -> Self {
        Self {
            source: source.to_string(),
            tx: tx.clone(),
            ack_timeout,
            panic_on_processed: false,
        }
    }
}

impl ClusterStateTaskListener<TestState> for Recorder {
    fn on_failure(&self, error: &ClusterStateError) {
        let _ = self.tx.send(Outcome::Failed {
            source: self.source.clone(),
            error: error.clone(),
        });
    }

    fn cluster_state_processed(&self, old: &Arc<TestState>, new: &Arc<TestState>) {
        if self.panic_on_processed {
            panic!("listener of {} exploded", self.source);
        }
        let _ = self.tx.send(Outcome::Processed {
            source: self.source.clone(),
            old: Arc::clone(old),
            new: Arc::clone(new),
        });
    }
}

impl AckedTaskListener<TestState> for Recorder {
    fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    fn on_all_nodes_acked(&self, error: Option<&ClusterStateError>) {
        let _ = self.tx.send(Outcome::AllAcked {
            source: self.source.clone(),
            error: error.map(ToString::to_string),
        });
    }

    fn on_ack_timeout(&self) {
        let _ = self.tx.send(Outcome::AckTimedOut {
            source: self.source.clone(),
        });
    }
}

/// Listener for tasks whose outcome the test does not care about.
pub struct Ignore;

impl ClusterStateTaskListener<TestState> for Ignore {
    fn on_failure(&self, _error: &ClusterStateError) {}
}

pub fn ignore() -> TaskListener<TestState> {
    TaskListener::basic(Arc::new(Ignore))
}

// ---- Executor ----

/// Appends every task to `entries`; tasks starting with `reject:` fail on their own.
#[derive(Default)]
pub struct AppendExecutor {
    pub executions: AtomicUsize,
    pub in_flight: AtomicBool,
    pub overlapped: AtomicBool,
    pub publications: Mutex<Vec<PublicationOutcome>>,
}

impl AppendExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl BatchExecutor<TestState> for AppendExecutor {
    type Task = String;

    fn execute(
        &self,
        current: &Arc<TestState>,
        tasks: &[String],
    ) -> Result<ClusterTasksResult<TestState>, ClusterStateError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.executions.fetch_add(1, Ordering::SeqCst);

        let mut builder = ClusterTasksResultBuilder::new();
        let mut accepted = Vec::new();
        for task in tasks {
            if let Some(reason) = task.strip_prefix("reject:") {
                builder = builder.failure(ClusterStateError::rejected(reason));
            } else {
                builder = builder.success();
                accepted.push(task.clone());
            }
        }
        let new_state = current.with_entries(accepted);

        self.in_flight.store(false, Ordering::SeqCst);
        Ok(builder.build(new_state))
    }

    fn describe_tasks(&self, tasks: &[String]) -> String {
        format!("append {}", tasks.len())
    }

    fn on_publication_complete(&self, outcome: &PublicationOutcome) {
        self.publications.lock().push(outcome.clone());
    }
}

// ---- Waiting ----

pub async fn next_outcome(rx: &mut Outcomes) -> Outcome {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a task outcome")
        .expect("outcome channel closed")
}

pub async fn collect_outcomes(rx: &mut Outcomes, n: usize) -> Vec<Outcome> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(next_outcome(rx).await);
    }
    out
}

pub async fn wait_for_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
}

/// Blocks the update loop inside `execute` until released.
pub struct Gate {
    entered: std::sync::Barrier,
    release: std::sync::Barrier,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: std::sync::Barrier::new(2),
            release: std::sync::Barrier::new(2),
        })
    }

    /// Called from inside the blocked executor.
    pub fn hold(&self) {
        self.entered.wait();
        self.release.wait();
    }

    pub async fn wait_entered(self: &Arc<Self>) {
        let gate = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            gate.entered.wait();
        })
        .await
        .expect("join");
    }

    pub async fn open(self: &Arc<Self>) {
        let gate = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            gate.release.wait();
        })
        .await
        .expect("join");
    }
}

/// Update task that parks the loop on a [`Gate`] and leaves the state unchanged.
pub struct Blocker(pub Arc<Gate>);

impl masterloop::ClusterStateUpdateTask<TestState> for Blocker {
    fn execute(&self, current: &Arc<TestState>) -> Result<Arc<TestState>, ClusterStateError> {
        self.0.hold();
        Ok(Arc::clone(current))
    }
}
