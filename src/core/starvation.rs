//! # Starvation watcher.
//!
//! Reports when the pending queue stays non-empty for longer than
//! `Config::starvation_logging_threshold`, then again every further threshold
//! while it stays non-empty. Any observation of an empty queue starts over.
//!
//! Observed by the update loop before it takes each batch and by a ticker task
//! while a batch is running.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::time::format_duration;

#[derive(Default)]
struct WatchState {
    nonempty_since: Option<Duration>,
    last_logged: Duration,
}

/// A starvation warning that was just logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StarvationReport {
    pub(crate) nonempty_for: Duration,
    pub(crate) pending: usize,
    pub(crate) oldest_age: Duration,
}

pub(crate) struct StarvationWatcher {
    threshold: Duration,
    state: Mutex<WatchState>,
}

impl StarvationWatcher {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: Mutex::new(WatchState::default()),
        }
    }

    /// Records one look at the queue: `pending` queued tasks, the oldest submitted at `oldest`.
    pub(crate) fn observe(
        &self,
        now: Duration,
        pending: usize,
        oldest: Option<Duration>,
    ) -> Option<StarvationReport> {
        let mut state = self.state.lock();
        if pending == 0 {
            state.nonempty_since = None;
            return None;
        }

        let Some(since) = state.nonempty_since else {
            state.nonempty_since = Some(now);
            state.last_logged = now;
            return None;
        };

        let nonempty_for = now.saturating_sub(since);
        if now.saturating_sub(state.last_logged) < self.threshold || nonempty_for < self.threshold {
            return None;
        }
        state.last_logged = now;
        drop(state);

        let oldest_age = oldest.map_or(Duration::ZERO, |at| now.saturating_sub(at));
        warn!(
            "pending task queue has been nonempty for [{}/{}ms] \
             which is longer than the warn threshold of [{}ms]; \
             there are currently [{}] pending tasks, the oldest of which has age [{}/{}ms]",
            format_duration(nonempty_for),
            nonempty_for.as_millis(),
            self.threshold.as_millis(),
            pending,
            format_duration(oldest_age),
            oldest_age.as_millis(),
        );
        Some(StarvationReport {
            nonempty_for,
            pending,
            oldest_age,
        })
    }
}
