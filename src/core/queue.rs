//! # Pending task queue.
//!
//! Multi-producer queue of [`PendingEntry`]s ordered by `(priority, insert_order)`,
//! consumed one executor batch at a time by the update loop.
//!
//! ## Rules
//! - `submit` holds the lock only to assign insert orders and insert; it never
//!   waits for the loop. Entries of one `submit` call get consecutive orders.
//! - `take_next_batch` removes the head entry and every other queued entry of
//!   the same executor, in submission order, in one critical section.
//! - The entries of the batch being executed stay visible to
//!   [`PendingQueue::pending_tasks`] until [`PendingQueue::clear_executing`].
//! - After [`PendingQueue::drain`] the queue is closed: `submit` hands the
//!   entries back to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use super::batch::PendingEntry;
use crate::tasks::Priority;

/// Snapshot of one queued or executing task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTask {
    pub insert_order: u64,
    pub priority: Priority,
    pub source: Arc<str>,
    /// Time since submission at the moment of the snapshot.
    pub time_in_queue: Duration,
    /// Part of the batch the update loop is running right now.
    pub executing: bool,
}

#[derive(Clone)]
struct TaskInfo {
    insert_order: u64,
    priority: Priority,
    source: Arc<str>,
    submitted_at: Duration,
}

impl TaskInfo {
    fn of<S>(entry: &PendingEntry<S>) -> Self {
        Self {
            insert_order: entry.insert_order,
            priority: entry.priority,
            source: Arc::clone(&entry.source),
            submitted_at: entry.submitted_at,
        }
    }

    fn snapshot(&self, now: Duration, executing: bool) -> PendingTask {
        PendingTask {
            insert_order: self.insert_order,
            priority: self.priority,
            source: Arc::clone(&self.source),
            time_in_queue: now.saturating_sub(self.submitted_at),
            executing,
        }
    }
}

struct QueueInner<S> {
    entries: BTreeMap<(Priority, u64), PendingEntry<S>>,
    next_order: u64,
    executing: Vec<TaskInfo>,
    closed: bool,
}

pub(crate) struct PendingQueue<S> {
    inner: Mutex<QueueInner<S>>,
    notify: Notify,
}

impl<S: 'static> PendingQueue<S> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: BTreeMap::new(),
                next_order: 0,
                executing: Vec::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues `entries` atomically and wakes the loop.
    ///
    /// Returns the entries untouched if the queue is closed.
    pub(crate) fn submit(
        &self,
        mut entries: Vec<PendingEntry<S>>,
    ) -> Result<(), Vec<PendingEntry<S>>> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(entries);
            }
            for mut entry in entries.drain(..) {
                entry.insert_order = inner.next_order;
                inner.next_order += 1;
                inner
                    .entries
                    .insert((entry.priority, entry.insert_order), entry);
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Removes the next batch: the head entry plus every queued entry of the same executor.
    ///
    /// The removed entries are marked as executing.
    pub(crate) fn take_next_batch(&self) -> Option<Vec<PendingEntry<S>>> {
        let mut inner = self.inner.lock();
        let head = inner.entries.values().next()?.executor.id();

        let mut keys: Vec<(Priority, u64)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.executor.id() == head)
            .map(|(k, _)| *k)
            .collect();
        keys.sort_by_key(|(_, order)| *order);

        let batch: Vec<PendingEntry<S>> = keys
            .iter()
            .filter_map(|k| inner.entries.remove(k))
            .collect();
        inner.executing = batch.iter().map(TaskInfo::of).collect();
        Some(batch)
    }

    /// Forgets the batch marked by the last `take_next_batch`.
    pub(crate) fn clear_executing(&self) {
        self.inner.lock().executing.clear();
    }

    /// Number of queued (not executing) entries and the submission time of the
    /// oldest one, read under one lock.
    pub(crate) fn backlog(&self) -> (usize, Option<Duration>) {
        let inner = self.inner.lock();
        let oldest = inner.entries.values().map(|e| e.submitted_at).min();
        (inner.entries.len(), oldest)
    }

    /// Executing entries first, then queued entries in service order.
    pub(crate) fn pending_tasks(&self, now: Duration) -> Vec<PendingTask> {
        let inner = self.inner.lock();
        inner
            .executing
            .iter()
            .map(|t| t.snapshot(now, true))
            .chain(
                inner
                    .entries
                    .values()
                    .map(|e| TaskInfo::of(e).snapshot(now, false)),
            )
            .collect()
    }

    /// Executing plus queued entry count.
    pub(crate) fn number_of_pending_tasks(&self) -> usize {
        let inner = self.inner.lock();
        inner.executing.len() + inner.entries.len()
    }

    /// Closes the queue and returns everything still queued, in service order.
    pub(crate) fn drain(&self) -> Vec<PendingEntry<S>> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        std::mem::take(&mut inner.entries).into_values().collect()
    }

    /// Resolves after the next `submit` (or immediately if one is pending).
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
