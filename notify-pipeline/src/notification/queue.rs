//! Ingestion queue between event producers and the assembler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::assembler::NotificationAssembler;
use super::model::Event;
use crate::{Error, Result};

/// Create a connected queue handle and its single consumer.
pub fn ingestion_queue() -> (IngestionQueue, QueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        IngestionQueue {
            tx,
            depth: depth.clone(),
        },
        QueueConsumer { rx, depth },
    )
}

/// Producer side. Cheap to clone; `enqueue` never blocks.
#[derive(Debug, Clone)]
pub struct IngestionQueue {
    tx: mpsc::UnboundedSender<Event>,
    depth: Arc<AtomicUsize>,
}

impl IngestionQueue {
    /// Append `event` for processing.
    ///
    /// Fails only once the consumer has shut down.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let event_type = event.event_type.clone();
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QueueClosed);
        }
        debug!(event_type = %event_type, "Event queued");
        Ok(())
    }

    /// Events enqueued but not yet taken by the consumer.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side. Processes events one at a time in enqueue order.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<Event>,
    depth: Arc<AtomicUsize>,
}

impl QueueConsumer {
    fn take(&self, event: Event, assembler: &NotificationAssembler) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        assembler.accept(event);
    }

    /// Forward events to `assembler` until cancelled, then process everything
    /// already enqueued. Returns the number of events processed.
    pub async fn run(mut self, assembler: Arc<NotificationAssembler>, cancel: CancellationToken) -> u64 {
        let mut processed = 0u64;
        info!("Ingestion consumer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => {
                        self.take(event, &assembler);
                        processed += 1;
                    }
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut drained = 0u64;
        while let Ok(event) = self.rx.try_recv() {
            self.take(event, &assembler);
            drained += 1;
        }
        processed += drained;

        info!(processed, drained, "Ingestion consumer stopped");
        processed
    }
}
