//! Real-time publishers.
//!
//! A publisher pushes a persisted notification to live subscribers. Two
//! implementations are provided:
//! - In-process WebSocket fan-out
//! - Hosted pub/sub over the Pusher HTTP API

mod pusher;
mod websocket;

pub use pusher::{PusherConfig, PusherPublisher};
pub use websocket::{Subscription, WebSocketPublisher};

use async_trait::async_trait;

use super::model::Notification;
use crate::Result;

/// Pushes notifications to real-time subscribers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one notification. An error affects only this publisher.
    async fn publish(&self, notification: &Notification) -> Result<()>;
}
