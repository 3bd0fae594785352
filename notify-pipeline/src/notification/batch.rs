//! Write batching for assembled notifications.
//!
//! Notifications are buffered in memory and written to the store in one bulk
//! insert, either periodically or when the assembler reports that a full batch
//! is waiting. Stored rows are handed to a background delivery task that fans
//! them out through the [`Broadcaster`] in write order, so a slow publisher
//! never holds back the next write.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broadcaster::Broadcaster;
use super::model::Notification;
use crate::Error;
use crate::database::repositories::NotificationRepository;

/// Configuration for the batch processor.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of notifications written per flush; also the size that
    /// triggers an immediate flush.
    pub batch_size: usize,
    /// Interval of the periodic flush.
    pub flush_interval: Duration,
    /// Upper bound on a single bulk write.
    pub flush_timeout: Duration,
    /// Number of write attempts a notification gets before it is dropped.
    pub max_flush_attempts: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(10),
            max_flush_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct BufferedNotification {
    notification: Notification,
    /// Failed write attempts so far.
    attempts: u32,
}

/// In-memory holding area for notifications awaiting a bulk write.
///
/// Appends and drains happen under one short critical section, so an append
/// racing a drain is either part of the drained batch or stays buffered.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    entries: Mutex<VecDeque<BufferedNotification>>,
    flush_signal: Notify,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification and return the buffer length after the append.
    pub fn push(&self, notification: Notification) -> usize {
        let mut entries = self.entries.lock();
        entries.push_back(BufferedNotification {
            notification,
            attempts: 0,
        });
        entries.len()
    }

    /// Tell the processor that at least a full batch is waiting.
    ///
    /// Requests made while no flush is waiting collapse into one, and a request
    /// that finds less than a batch buffered is ignored.
    pub fn request_flush(&self) {
        self.flush_signal.notify_one();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) async fn flush_requested(&self) {
        self.flush_signal.notified().await;
    }

    /// Remove up to `max` of the oldest entries.
    fn drain_up_to(&self, max: usize) -> Vec<BufferedNotification> {
        let mut entries = self.entries.lock();
        let take = max.min(entries.len());
        entries.drain(..take).collect()
    }

    /// Put a failed batch back at the head, keeping its original order.
    fn requeue_front(&self, batch: Vec<BufferedNotification>) {
        let mut entries = self.entries.lock();
        for entry in batch.into_iter().rev() {
            entries.push_front(entry);
        }
    }
}

/// Result of a single [`BatchProcessor::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no write and no fan-out happened.
    Empty,
    /// The write succeeded; `persisted` rows were stored and fanned out.
    Persisted { persisted: usize },
    /// The write failed; entries were put back or dropped.
    Failed { requeued: usize, dropped: usize },
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchStats {
    pub writes: u64,
    pub failed_writes: u64,
    pub persisted: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct BatchCounters {
    writes: AtomicU64,
    failed_writes: AtomicU64,
    persisted: AtomicU64,
    dropped: AtomicU64,
}

enum DeliveryJob {
    Rows(Vec<Notification>),
    /// Answered once every job queued before it has been fanned out.
    Barrier(oneshot::Sender<()>),
}

async fn deliver(broadcaster: Arc<Broadcaster>, mut jobs: mpsc::UnboundedReceiver<DeliveryJob>) {
    while let Some(job) = jobs.recv().await {
        match job {
            DeliveryJob::Rows(rows) => {
                for row in &rows {
                    broadcaster.fan_out(row).await;
                }
            }
            DeliveryJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Drains the [`BatchBuffer`] into the store and queues stored rows for fan-out.
pub struct BatchProcessor {
    config: BatchConfig,
    buffer: Arc<BatchBuffer>,
    repository: Arc<dyn NotificationRepository>,
    broadcaster: Arc<Broadcaster>,
    flush_lock: tokio::sync::Mutex<()>,
    counters: BatchCounters,
    deliveries: Mutex<Option<mpsc::UnboundedSender<DeliveryJob>>>,
    delivery_task: Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    /// Must be called from within a Tokio runtime; the delivery task is
    /// spawned here.
    pub fn new(
        config: BatchConfig,
        buffer: Arc<BatchBuffer>,
        repository: Arc<dyn NotificationRepository>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivery_task = tokio::spawn(deliver(broadcaster.clone(), rx));
        Self {
            config,
            buffer,
            repository,
            broadcaster,
            flush_lock: tokio::sync::Mutex::new(()),
            counters: BatchCounters::default(),
            deliveries: Mutex::new(Some(tx)),
            delivery_task: Mutex::new(Some(delivery_task)),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            writes: self.counters.writes.load(Ordering::Relaxed),
            failed_writes: self.counters.failed_writes.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Write up to `batch_size` of the oldest buffered notifications in one
    /// bulk insert and queue every stored row for fan-out.
    ///
    /// Returns once the write is done; use [`BatchProcessor::settle`] to wait
    /// for the fan-out. Concurrent calls are serialized; each buffered entry is
    /// drained by at most one of them.
    pub async fn flush(&self) -> FlushOutcome {
        let guard = self.flush_lock.lock().await;

        let batch = self.buffer.drain_up_to(self.config.batch_size);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let notifications: Vec<Notification> =
            batch.iter().map(|e| e.notification.clone()).collect();
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        let write = timeout(
            self.config.flush_timeout,
            self.repository.insert_batch(&notifications),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout(format!(
                "bulk insert of {} notifications exceeded {:?}",
                notifications.len(),
                self.config.flush_timeout
            )))
        });

        let stored = match write {
            Ok(stored) => stored,
            Err(e) => return self.handle_failed_write(batch, e),
        };

        let persisted = stored.len();
        debug!(
            submitted = notifications.len(),
            persisted, "Notification batch written"
        );
        self.counters
            .persisted
            .fetch_add(persisted as u64, Ordering::Relaxed);

        // Queued under the flush lock so batches reach subscribers in write order.
        let undelivered = self.dispatch(stored);
        drop(guard);

        if let Err(rows) = undelivered {
            for row in &rows {
                self.broadcaster.fan_out(row).await;
            }
        }

        FlushOutcome::Persisted { persisted }
    }

    /// Hand `rows` to the delivery task, or give them back once it has stopped.
    fn dispatch(&self, rows: Vec<Notification>) -> std::result::Result<(), Vec<Notification>> {
        let deliveries = self.deliveries.lock();
        let Some(tx) = deliveries.as_ref() else {
            return Err(rows);
        };
        tx.send(DeliveryJob::Rows(rows)).map_err(|e| match e.0 {
            DeliveryJob::Rows(rows) => rows,
            DeliveryJob::Barrier(_) => Vec::new(),
        })
    }

    /// Wait until every batch written so far has been fanned out.
    pub async fn settle(&self) {
        let (done, settled) = oneshot::channel();
        let queued = self
            .deliveries
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(DeliveryJob::Barrier(done)).is_ok());
        if queued {
            let _ = settled.await;
        }
    }

    /// Let the delivery task finish what is queued, then wait for secondary
    /// channel sends still in flight.
    async fn stop_delivery(&self) {
        let sender = self.deliveries.lock().take();
        drop(sender);

        let delivery_task = self.delivery_task.lock().take();
        if let Some(task) = delivery_task
            && let Err(e) = task.await
        {
            error!(error = %e, "Delivery task ended abnormally");
        }
        self.broadcaster.wait_for_channels().await;
    }

    /// Flush, then keep flushing while a full batch is still waiting.
    async fn flush_ready(&self) {
        while let FlushOutcome::Persisted { .. } = self.flush().await {
            if self.buffer.len() < self.config.batch_size {
                break;
            }
        }
    }

    fn handle_failed_write(&self, batch: Vec<BufferedNotification>, err: Error) -> FlushOutcome {
        self.counters.failed_writes.fetch_add(1, Ordering::Relaxed);
        let transient = err.is_transient();

        let (retry, exhausted): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|mut entry| {
                entry.attempts += 1;
                entry
            })
            .partition(|entry| transient && entry.attempts < self.config.max_flush_attempts);

        let requeued = retry.len();
        let dropped = exhausted.len();

        if requeued > 0 {
            warn!(
                error = %err,
                requeued,
                "Failed to write notification batch, re-queued for the next flush"
            );
            self.buffer.requeue_front(retry);
        }
        if dropped > 0 {
            self.counters
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            error!(
                error = %err,
                dropped,
                transient,
                "Dropping notifications after failed batch write"
            );
        }

        FlushOutcome::Failed { requeued, dropped }
    }

    /// Flush until the buffer is empty; failing entries run out of attempts
    /// and are dropped, so this always terminates.
    pub async fn drain(&self) {
        loop {
            match self.flush().await {
                FlushOutcome::Empty => break,
                FlushOutcome::Persisted { .. } | FlushOutcome::Failed { .. } => {}
            }
        }
    }

    /// Run the periodic and threshold flush loop until `cancel` fires, then
    /// drain whatever is still buffered and finish delivery.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            batch_size = self.config.batch_size,
            interval = ?period,
            "Batch processor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.buffer.flush_requested() => {
                    // Requests outlive the batch that raised them; skip stale ones.
                    if self.buffer.len() >= self.config.batch_size {
                        self.flush_ready().await;
                    }
                }
                _ = ticker.tick() => {
                    self.flush_ready().await;
                }
            }
        }

        let remaining = self.buffer.len();
        if remaining > 0 {
            info!(remaining, "Flushing buffered notifications before shutdown");
        }
        self.drain().await;
        self.stop_delivery().await;
        info!("Batch processor stopped");
    }
}
