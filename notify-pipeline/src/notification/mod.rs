//! Asynchronous notification pipeline.
//!
//! Events flow through the pipeline as follows:
//! 1. Producers call [`IngestionQueue::enqueue`].
//! 2. A single consumer hands each event to the [`NotificationAssembler`].
//! 3. Assembled notifications wait in the [`BatchBuffer`].
//! 4. The [`BatchProcessor`] writes them in bulk and the [`Broadcaster`] fans
//!    out every stored row.
//!
//! The [`ExpiryReaper`] independently deletes notifications past their TTL.

pub mod assembler;
pub mod batch;
pub mod broadcaster;
pub mod channels;
pub mod clock;
pub mod model;
pub mod publishers;
pub mod queue;
pub mod reaper;
pub mod service;

pub use assembler::NotificationAssembler;
pub use batch::{BatchBuffer, BatchConfig, BatchProcessor, BatchStats, FlushOutcome};
pub use broadcaster::{Broadcaster, FanOutReport};
pub use channels::{DeliveryChannel, EmailChannel, EmailConfig, PushChannel, PushConfig};
pub use clock::{Clock, IdGenerator, ManualClock, SystemClock, UuidGenerator};
pub use model::{COMMENT_ADDED, Event, Notification};
pub use publishers::{Publisher, PusherConfig, PusherPublisher, Subscription, WebSocketPublisher};
pub use queue::{IngestionQueue, QueueConsumer, ingestion_queue};
pub use reaper::ExpiryReaper;
pub use service::{
    Delivery, DeliveryConfig, NotificationPipeline, PipelineConfig, PipelineStats, PublisherKind,
    build_delivery,
};
