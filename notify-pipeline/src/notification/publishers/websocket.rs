//! In-process WebSocket fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Publisher;
use crate::Result;
use crate::notification::model::Notification;

type Registry = DashMap<Uuid, mpsc::Sender<Arc<str>>>;

/// Broadcasts every notification, serialized once, to all connected
/// subscribers.
///
/// Each subscriber owns a bounded queue. A subscriber whose queue is full
/// misses that message; one whose connection is gone is skipped and pruned.
#[derive(Debug, Clone)]
pub struct WebSocketPublisher {
    subscribers: Arc<Registry>,
    buffer_size: usize,
}

/// A live registration. Dropping it disconnects the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::Receiver<Arc<str>>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next serialized notification, or `None` once disconnected.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_some() {
            debug!(subscriber = %self.id, "WebSocket subscriber disconnected");
        }
    }
}

impl WebSocketPublisher {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a new subscriber.
    pub fn connect(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        debug!(subscriber = %id, total = self.subscribers.len(), "WebSocket subscriber connected");
        Subscription {
            id,
            receiver: rx,
            registry: self.subscribers.clone(),
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn disconnect(&self, id: Uuid) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Offer `payload` to every open subscriber; returns how many accepted it.
    pub fn broadcast(&self, payload: Arc<str>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %entry.key(), "WebSocket subscriber lagging, message skipped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Pruned after iteration; removing while holding a shard guard deadlocks.
        for id in closed {
            self.subscribers.remove(&id);
        }

        delivered
    }
}

#[async_trait]
impl Publisher for WebSocketPublisher {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn publish(&self, notification: &Notification) -> Result<()> {
        let payload: Arc<str> = serde_json::to_string(notification)?.into();
        let delivered = self.broadcast(payload);
        debug!(id = %notification.id, delivered, "Notification broadcast over WebSocket");
        Ok(())
    }
}
