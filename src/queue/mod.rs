//! Bounded, priority-ordered asynchronous message queue
//!
//! Messages dequeue in `(priority, enqueued_at)` order -- lower priority
//! numbers first, FIFO within a priority class. The consumption loop
//! gates every pop through the queue-side sliding-window limiter: a
//! rejected message is never dropped, it is delayed briefly and
//! re-enqueued one priority class lower with a fresh timestamp. Each
//! demotion strictly lowers urgency, so a noisy source backs off while
//! fresh traffic from quiet sources keeps draining, and the demoted
//! message is still admitted once its source's window has room.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;

/// Inbound message body carried through the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: Option<String>,
    pub attachment_urls: Vec<String>,
    pub message_id: i64,
}

/// A message waiting in (or popped from) the queue
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub source_id: i64,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    pub payload: MessagePayload,
}

/// Heap entry; the ordering key is `(priority, enqueued_at, seq)`.
/// `seq` is a monotone enqueue counter that keeps FIFO total when two
/// messages share a timestamp.
struct HeapEntry {
    priority: u8,
    enqueued_at: Instant,
    seq: u64,
    message: QueuedMessage,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.enqueued_at.cmp(&other.enqueued_at))
            .then(self.seq.cmp(&other.seq))
    }
}

/// Queue counters for status reporting
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub processed: u64,
    pub requeued: u64,
    pub handler_errors: u64,
}

/// The priority queue itself: bounded buffer plus wakeup signalling
pub struct MessageQueue {
    heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
    notify: Notify,
    capacity: usize,
    normal_priority: u8,
    seq: AtomicU64,
}

impl MessageQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            capacity: config.capacity,
            normal_priority: config.normal_priority,
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue at normal priority
    pub fn put(&self, source_id: i64, payload: MessagePayload) -> Result<()> {
        self.put_with_priority(source_id, payload, self.normal_priority)
    }

    /// Enqueue at an explicit priority. Fails fast when the queue is at
    /// capacity; callers (the feeds) log and count the drop.
    pub fn put_with_priority(
        &self,
        source_id: i64,
        payload: MessagePayload,
        priority: u8,
    ) -> Result<()> {
        {
            let mut heap = self.heap.lock().expect("queue lock poisoned");
            if heap.len() >= self.capacity {
                return Err(Error::QueueFull(self.capacity));
            }
            self.push_locked(&mut heap, source_id, payload, priority);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Re-insert a rate-limited message, demoted one priority class and
    /// stamped with a fresh enqueue time. Bypasses the capacity check:
    /// a message that made it into the queue is never dropped.
    fn requeue_demoted(&self, message: QueuedMessage) {
        let priority = message.priority.saturating_add(1);
        {
            let mut heap = self.heap.lock().expect("queue lock poisoned");
            self.push_locked(&mut heap, message.source_id, message.payload, priority);
        }
        self.notify.notify_one();
    }

    fn push_locked(
        &self,
        heap: &mut BinaryHeap<Reverse<HeapEntry>>,
        source_id: i64,
        payload: MessagePayload,
        priority: u8,
    ) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        heap.push(Reverse(HeapEntry {
            priority,
            enqueued_at: Instant::now(),
            seq,
            message: QueuedMessage {
                source_id,
                priority,
                enqueued_at: Utc::now(),
                payload,
            },
        }));
    }

    /// Pop the lowest `(priority, enqueued_at)` entry, waiting until one
    /// is available. Returns None once `cancel` fires: no new pops
    /// after shutdown, pending items stay intact.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<QueuedMessage> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if let Some(message) = self.try_pop() {
                return Some(message);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<QueuedMessage> {
        let mut heap = self.heap.lock().expect("queue lock poisoned");
        heap.pop().map(|Reverse(entry)| entry.message)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Handler invoked for every admitted message
#[async_trait::async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, message: QueuedMessage) -> Result<()>;
}

/// Optional callback for handler failures
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// The consumption loop: pops, gates through the sliding-window
/// limiter, demotes-or-dispatches, and survives handler failures.
pub struct QueueWorker {
    queue: Arc<MessageQueue>,
    limiter: Arc<crate::limiter::SlidingWindowLimiter>,
    metrics: Arc<dyn MetricsSink>,
    requeue_delay: Duration,
    error_callback: Option<ErrorCallback>,
    stats: Arc<WorkerStats>,
}

#[derive(Default)]
struct WorkerStats {
    processed: AtomicU64,
    requeued: AtomicU64,
    handler_errors: AtomicU64,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<MessageQueue>,
        limiter: Arc<crate::limiter::SlidingWindowLimiter>,
        metrics: Arc<dyn MetricsSink>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            limiter,
            metrics,
            requeue_delay: Duration::from_millis(config.requeue_delay_ms),
            error_callback: None,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.stats.processed.load(AtomicOrdering::Relaxed),
            requeued: self.stats.requeued.load(AtomicOrdering::Relaxed),
            handler_errors: self.stats.handler_errors.load(AtomicOrdering::Relaxed),
        }
    }

    /// Run until `cancel` fires. An in-flight handler call is allowed
    /// to finish; no new pops happen afterwards.
    pub async fn run<H: QueueHandler>(&self, handler: Arc<H>, cancel: CancellationToken) {
        info!("queue worker started");

        while let Some(message) = self.queue.pop(&cancel).await {
            let source = message.source_id.to_string();

            if !self.limiter.try_admit(message.source_id) {
                self.stats.requeued.fetch_add(1, AtomicOrdering::Relaxed);
                self.metrics
                    .increment("queue_rate_limited", &[("source", &source)]);
                debug!(
                    source_id = message.source_id,
                    priority = message.priority,
                    "rate limited, demoting"
                );

                // Short delay with jitter so a demoted burst does not
                // land on the same instant again
                let jitter = rand::thread_rng().gen_range(0..=self.requeue_delay.as_millis() as u64 / 4);
                sleep(self.requeue_delay + Duration::from_millis(jitter)).await;
                self.queue.requeue_demoted(message);
                continue;
            }

            self.metrics
                .increment("queue_admitted", &[("source", &source)]);

            // Handler failures and panics are contained here: the item
            // is complete either way and the loop keeps running.
            let outcome = std::panic::AssertUnwindSafe(handler.handle(message))
                .catch_unwind()
                .await;

            self.stats.processed.fetch_add(1, AtomicOrdering::Relaxed);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.handler_errors.fetch_add(1, AtomicOrdering::Relaxed);
                    self.metrics
                        .increment("handler_errors", &[("source", &source)]);
                    warn!(source_id = %source, error = %e, "handler failed");
                    if let Some(cb) = &self.error_callback {
                        cb(&e);
                    }
                }
                Err(panic) => {
                    self.stats.handler_errors.fetch_add(1, AtomicOrdering::Relaxed);
                    self.metrics
                        .increment("handler_errors", &[("source", &source)]);
                    error!(source_id = %source, "handler panicked: {:?}", panic);
                    if let Some(cb) = &self.error_callback {
                        cb(&Error::Internal("handler panicked".into()));
                    }
                }
            }
        }

        info!("queue worker stopped");
    }
}
