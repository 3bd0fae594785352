//! Pipeline wiring.
//!
//! The [`NotificationPipeline`] owns every long-running task:
//! - the ingestion consumer feeding the assembler
//! - the batch processor (timer and threshold flushes)
//! - the expiry reaper
//!
//! Each task stops on its own `CancellationToken`, in dependency order, so
//! events already enqueued at shutdown still reach the store.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::assembler::{DEFAULT_TTL_SECS, NotificationAssembler};
use super::batch::{BatchBuffer, BatchConfig, BatchProcessor, BatchStats};
use super::broadcaster::Broadcaster;
use super::channels::{EmailChannel, EmailConfig, PushChannel, PushConfig};
use super::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use super::model::Event;
use super::publishers::{PusherConfig, PusherPublisher, WebSocketPublisher};
use super::queue::{IngestionQueue, ingestion_queue};
use super::reaper::{DEFAULT_REAPER_INTERVAL, ExpiryReaper};
use crate::database::repositories::NotificationRepository;
use crate::{Error, Result};

/// Configuration for the notification pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch: BatchConfig,
    pub reaper_interval: Duration,
    pub ttl: chrono::Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            ttl: chrono::Duration::seconds(DEFAULT_TTL_SECS),
        }
    }
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipelineStats {
    pub queue_depth: usize,
    pub buffered: usize,
    pub batches: BatchStats,
}

struct RunningTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningTask {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Pipeline task ended abnormally");
        }
    }
}

/// Shutdown order: consumer, then processor, then reaper.
struct RunningTasks {
    consumer: RunningTask,
    processor: RunningTask,
    reaper: RunningTask,
}

/// A running notification pipeline.
pub struct NotificationPipeline {
    queue: IngestionQueue,
    buffer: Arc<BatchBuffer>,
    processor: Arc<BatchProcessor>,
    reaper: Arc<ExpiryReaper>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl NotificationPipeline {
    /// Start the pipeline with the wall clock and random ids.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        repository: Arc<dyn NotificationRepository>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self::start_with(
            config,
            repository,
            broadcaster,
            Arc::new(SystemClock),
            Arc::new(UuidGenerator),
        )
    }

    /// Start the pipeline with explicit time and id sources.
    pub fn start_with(
        config: PipelineConfig,
        repository: Arc<dyn NotificationRepository>,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let buffer = Arc::new(BatchBuffer::new());
        let assembler = Arc::new(NotificationAssembler::new(
            config.ttl,
            config.batch.batch_size,
            clock.clone(),
            ids,
            buffer.clone(),
        ));
        let processor = Arc::new(BatchProcessor::new(
            config.batch.clone(),
            buffer.clone(),
            repository.clone(),
            broadcaster,
        ));
        let reaper = Arc::new(ExpiryReaper::new(repository, clock, config.reaper_interval));

        let (queue, consumer) = ingestion_queue();

        let consumer_cancel = CancellationToken::new();
        let consumer = RunningTask {
            name: "ingestion-consumer",
            handle: tokio::spawn({
                let cancel = consumer_cancel.clone();
                async move {
                    consumer.run(assembler, cancel).await;
                }
            }),
            cancel: consumer_cancel,
        };

        let processor_cancel = CancellationToken::new();
        let processor_task = RunningTask {
            name: "batch-processor",
            handle: tokio::spawn(processor.clone().run(processor_cancel.clone())),
            cancel: processor_cancel,
        };

        let reaper_cancel = CancellationToken::new();
        let reaper_task = RunningTask {
            name: "expiry-reaper",
            handle: tokio::spawn(reaper.clone().run(reaper_cancel.clone())),
            cancel: reaper_cancel,
        };

        info!(
            batch_size = config.batch.batch_size,
            flush_interval = ?config.batch.flush_interval,
            reaper_interval = ?config.reaper_interval,
            ttl_secs = config.ttl.num_seconds(),
            "Notification pipeline started"
        );

        Self {
            queue,
            buffer,
            processor,
            reaper,
            tasks: Mutex::new(Some(RunningTasks {
                consumer,
                processor: processor_task,
                reaper: reaper_task,
            })),
        }
    }

    /// Producer handle for the ingestion queue.
    pub fn queue(&self) -> IngestionQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, event: Event) -> Result<()> {
        self.queue.enqueue(event)
    }

    pub fn processor(&self) -> &Arc<BatchProcessor> {
        &self.processor
    }

    pub fn reaper(&self) -> &Arc<ExpiryReaper> {
        &self.reaper
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            queue_depth: self.queue.depth(),
            buffered: self.buffer.len(),
            batches: self.processor.stats(),
        }
    }

    /// Stop all tasks. Enqueued events are assembled and flushed first.
    ///
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.tasks.lock().take() else {
            return;
        };
        info!("Shutting down notification pipeline");

        tasks.consumer.stop().await;
        tasks.processor.stop().await;
        tasks.reaper.stop().await;

        info!("Notification pipeline stopped");
    }
}

/// A real-time publisher that can be selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherKind {
    WebSocket,
    Pusher,
}

impl FromStr for PublisherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "pusher" => Ok(Self::Pusher),
            other => Err(Error::config(format!("Unknown publisher: {other}"))),
        }
    }
}

/// Publishers and secondary channels to build the [`Broadcaster`] from.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub publishers: Vec<PublisherKind>,
    pub subscriber_buffer: usize,
    pub pusher: Option<PusherConfig>,
    pub email: EmailConfig,
    pub push: PushConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            publishers: vec![PublisherKind::WebSocket],
            subscriber_buffer: 64,
            pusher: None,
            email: EmailConfig::default(),
            push: PushConfig::default(),
        }
    }
}

/// The assembled delivery side.
pub struct Delivery {
    pub broadcaster: Arc<Broadcaster>,
    /// Present when the WebSocket publisher is selected, for the `/ws` route.
    pub websocket: Option<Arc<WebSocketPublisher>>,
}

pub fn build_delivery(config: &DeliveryConfig) -> Result<Delivery> {
    let mut broadcaster = Broadcaster::new();
    let mut websocket = None;

    for kind in &config.publishers {
        match kind {
            PublisherKind::WebSocket => {
                let publisher = Arc::new(WebSocketPublisher::new(config.subscriber_buffer));
                websocket = Some(publisher.clone());
                broadcaster = broadcaster.with_publisher(publisher);
            }
            PublisherKind::Pusher => {
                let pusher_config = config.pusher.clone().ok_or_else(|| {
                    Error::config("Pusher publisher selected but not configured")
                })?;
                broadcaster =
                    broadcaster.with_publisher(Arc::new(PusherPublisher::new(pusher_config)?));
            }
        }
    }

    let broadcaster = broadcaster
        .with_channel(Arc::new(EmailChannel::new(config.email.clone())))
        .with_channel(Arc::new(PushChannel::new(config.push.clone())));

    info!(
        publishers = ?broadcaster.publisher_names(),
        "Delivery configured"
    );

    Ok(Delivery {
        broadcaster: Arc::new(broadcaster),
        websocket,
    })
}
