//! Event bus: fans match events out to sinks without waiting on them.
//!
//! Every sink gets a bounded queue and its own delivery task. Publishing
//! never awaits: a full queue drops the event for that sink only, and a sink
//! that fails (or panics) is marked degraded and receives nothing further.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::model::{EventRecord, MatchEvent};
use crate::sinks::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SinkId(u64);

#[derive(Debug, Default)]
struct SinkHealth {
    degraded: AtomicBool,
    dropped: AtomicU64,
}

/// Delivery state of one sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkStatus {
    pub id: SinkId,
    pub name: String,
    pub degraded: bool,
    /// Events dropped because the sink's queue was full
    pub dropped: u64,
}

struct SinkSlot {
    id: SinkId,
    name: String,
    tx: mpsc::Sender<EventRecord>,
    health: Arc<SinkHealth>,
    task: JoinHandle<()>,
}

struct Inner {
    next_seq: u64,
    next_id: u64,
    capacity: usize,
    sinks: Vec<SinkSlot>,
    closed: bool,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl EventBus {
    /// `capacity` is the per-sink queue length
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_seq: 0,
                next_id: 0,
                capacity: capacity.max(1),
                sinks: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while holding the lock; recover the data if it ever does
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a sink. It receives events published from now on.
    ///
    /// Returns `None` once the bus is closed. Must be called from within a
    /// tokio runtime.
    pub fn subscribe(&self, sink: Box<dyn EventSink>) -> Option<SinkId> {
        let mut inner = self.lock();
        if inner.closed {
            debug!(sink = sink.name(), "Bus closed, sink not subscribed");
            return None;
        }
        let id = SinkId(inner.next_id);
        inner.next_id += 1;

        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(inner.capacity);
        let health = Arc::new(SinkHealth::default());
        let task = tokio::spawn(deliver(sink, rx, health.clone()));

        debug!(sink = %name, id = id.0, "Sink subscribed");
        inner.sinks.push(SinkSlot {
            id,
            name,
            tx,
            health,
            task,
        });
        Some(id)
    }

    /// Remove a sink. Events already queued for it are still delivered.
    pub fn unsubscribe(&self, id: SinkId) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.sinks.iter().position(|s| s.id == id) else {
            return false;
        };
        // Dropping the sender lets the delivery task drain and exit
        let slot = inner.sinks.remove(pos);
        debug!(sink = %slot.name, id = id.0, "Sink unsubscribed");
        true
    }

    /// Stamp and enqueue an event for every healthy sink. Never waits.
    pub fn publish(&self, ply: u32, event: MatchEvent) -> EventRecord {
        let mut inner = self.lock();
        let record = EventRecord {
            seq: inner.next_seq,
            ply,
            at: Utc::now(),
            event,
        };
        inner.next_seq += 1;

        for slot in &inner.sinks {
            if slot.health.degraded.load(Ordering::Relaxed) {
                continue;
            }
            match slot.tx.try_send(record.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = slot.health.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(sink = %slot.name, seq = record.seq, dropped, "Sink queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    // Delivery task is gone (sink failed or panicked)
                    slot.health.degraded.store(true, Ordering::Relaxed);
                    warn!(sink = %slot.name, "Sink stopped receiving, marked degraded");
                }
            }
        }
        record
    }

    pub fn sink_statuses(&self) -> Vec<SinkStatus> {
        self.lock()
            .sinks
            .iter()
            .map(|slot| SinkStatus {
                id: slot.id,
                name: slot.name.clone(),
                degraded: slot.health.degraded.load(Ordering::Relaxed),
                dropped: slot.health.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        self.lock().next_seq
    }

    /// Stop accepting events and give sinks up to `drain_timeout` to finish
    pub async fn close(&self, drain_timeout: Duration) {
        let slots: Vec<SinkSlot> = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.sinks)
        };
        let mut tasks = Vec::with_capacity(slots.len());
        let mut aborts = Vec::with_capacity(slots.len());
        for slot in slots {
            drop(slot.tx);
            aborts.push((slot.name, slot.task.abort_handle()));
            tasks.push(slot.task);
        }

        if tokio::time::timeout(drain_timeout, join_all(tasks)).await.is_err() {
            for (name, handle) in aborts {
                if !handle.is_finished() {
                    warn!(sink = %name, "Sink did not drain in time, abandoning");
                    handle.abort();
                }
            }
        }
    }
}

async fn deliver(
    mut sink: Box<dyn EventSink>,
    mut rx: mpsc::Receiver<EventRecord>,
    health: Arc<SinkHealth>,
) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = sink.receive(&record).await {
            error!(sink = sink.name(), seq = record.seq, error = %e, "Sink failed, marking degraded");
            health.degraded.store(true, Ordering::Relaxed);
            return;
        }
    }
    if let Err(e) = sink.close().await {
        warn!(sink = sink.name(), error = %e, "Sink close failed");
    }
}
