//! Email channel.
//!
//! No mail transport is wired in; messages are rendered and logged.

use async_trait::async_trait;
use tracing::info;

use super::DeliveryChannel;
use crate::Result;
use crate::notification::model::Notification;

/// Email channel configuration.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Prefix prepended to every subject line.
    pub subject_prefix: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subject_prefix: "[notify]".to_string(),
        }
    }
}

/// Email notification channel.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_subject(&self, notification: &Notification) -> String {
        format!(
            "{} {}",
            self.config.subject_prefix, notification.notification_type
        )
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            user_id = %notification.user_id,
            subject = %self.build_subject(notification),
            "[Email] Sent to user {}: {}",
            notification.user_id,
            notification.content
        );
        Ok(())
    }
}
