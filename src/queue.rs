//! Bounded delivery queue between callers and the connection task.
//!
//! The queue is the only buffering layer in the client. Writers push
//! records in from any task; the connection task drains them in FIFO
//! order. When the queue is full the newest record loses: the incoming
//! record is rejected and counted, records already queued are never
//! evicted. Records handed back after a failed delivery attempt re-enter
//! at the front so arrival order survives reconnects.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::record::Record;

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The record was appended to the queue.
    Accepted,
    /// The queue was full; the record was discarded and counted.
    Rejected,
}

struct QueueInner {
    records: VecDeque<Record>,
    dropped: u64,
}

/// Bounded FIFO of records awaiting delivery.
///
/// All operations take a single internal lock and never block on I/O, so
/// the queue is safe to touch from synchronous caller code and from the
/// connection task alike. Drop totals are published through a watch
/// channel, which naturally coalesces bursts: a subscriber that falls
/// behind sees only the latest cumulative count, never a stale one.
pub struct DeliveryQueue {
    inner: Mutex<QueueInner>,
    wakeup: Notify,
    drops_tx: watch::Sender<u64>,
    max_size: usize,
}

impl DeliveryQueue {
    /// Create a queue holding at most `max_size` records.
    pub fn new(max_size: usize) -> Self {
        let (drops_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(QueueInner {
                records: VecDeque::new(),
                dropped: 0,
            }),
            wakeup: Notify::new(),
            drops_tx,
            max_size,
        }
    }

    /// Append a record, rejecting it if the queue is at capacity.
    ///
    /// A rejected record increments the drop counter exactly once and is
    /// otherwise forgotten.
    pub fn enqueue(&self, record: Record) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.records.len() >= self.max_size {
                inner.dropped += 1;
                let dropped = inner.dropped;
                self.drops_tx.send_replace(dropped);
                debug!(dropped, max_size = self.max_size, "queue full, record dropped");
                EnqueueOutcome::Rejected
            } else {
                inner.records.push_back(record);
                EnqueueOutcome::Accepted
            }
        };
        if outcome == EnqueueOutcome::Accepted {
            self.wakeup.notify_one();
        }
        outcome
    }

    /// Take the oldest queued record, if any.
    pub(crate) fn pop_front(&self) -> Option<Record> {
        self.inner.lock().records.pop_front()
    }

    /// Return unacknowledged records to the front of the queue, oldest
    /// first, so they are retransmitted before anything queued later.
    ///
    /// If the queue lacks room for the whole batch, the newest of the
    /// returned records are dropped and counted, consistent with the
    /// enqueue policy. Returns how many were dropped.
    pub(crate) fn requeue_front(&self, mut records: Vec<Record>) -> u64 {
        let mut lost = 0u64;
        {
            let mut inner = self.inner.lock();
            while !records.is_empty() && inner.records.len() + records.len() > self.max_size {
                records.pop();
                lost += 1;
            }
            for record in records.into_iter().rev() {
                inner.records.push_front(record);
            }
            if lost > 0 {
                inner.dropped += lost;
                let dropped = inner.dropped;
                self.drops_tx.send_replace(dropped);
                debug!(lost, dropped, "queue full, unacknowledged records dropped");
            }
        }
        self.wakeup.notify_one();
        lost
    }

    /// Count a record lost outside the capacity check, such as one whose
    /// encoded frame exceeded the wire size limit.
    pub(crate) fn count_drop(&self) {
        let mut inner = self.inner.lock();
        inner.dropped += 1;
        let dropped = inner.dropped;
        self.drops_tx.send_replace(dropped);
    }

    /// Discard all queued records. Used at shutdown; discarded records are
    /// not counted as drops.
    pub(crate) fn clear(&self) {
        self.inner.lock().records.clear();
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records dropped since the queue was created. Never decreases.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Subscribe to cumulative drop counts.
    pub(crate) fn subscribe_drops(&self) -> watch::Receiver<u64> {
        self.drops_tx.subscribe()
    }

    /// Future that resolves once records may be available.
    ///
    /// The queue stores a wakeup permit when one arrives while nobody is
    /// waiting, so a single consumer that always drains before waiting
    /// cannot miss records.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wakeup.notified()
    }
}
