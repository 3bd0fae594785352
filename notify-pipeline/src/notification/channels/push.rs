//! Mobile push channel. Logs instead of contacting a push service.

use async_trait::async_trait;
use tracing::info;

use super::DeliveryChannel;
use crate::Result;
use crate::notification::model::Notification;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub enabled: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub struct PushChannel {
    config: PushConfig,
}

impl PushChannel {
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeliveryChannel for PushChannel {
    fn channel_type(&self) -> &'static str {
        "push"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            user_id = %notification.user_id,
            "[Push] Sent to user {}: {}",
            notification.user_id,
            notification.content
        );
        Ok(())
    }
}
