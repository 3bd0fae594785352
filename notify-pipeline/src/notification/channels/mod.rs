//! Secondary delivery channels.
//!
//! Best-effort side channels dispatched after a notification is persisted:
//! - Email
//! - Mobile push

mod email;
mod push;

pub use email::{EmailChannel, EmailConfig};
pub use push::{PushChannel, PushConfig};

use async_trait::async_trait;

use super::model::Notification;
use crate::Result;

/// A secondary delivery port. Failures are logged by the caller and never
/// affect persistence or real-time fan-out.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Deliver one notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<()>;
}
