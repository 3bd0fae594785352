//! Events accepted by the pipeline and the notifications assembled from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type emitted when a comment is added to a post.
pub const COMMENT_ADDED: &str = "COMMENT_ADDED";

/// Something that happened and may result in a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Type tag, e.g. `COMMENT_ADDED`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Originating user; also the notification recipient.
    pub user_id: String,
    /// Subject of the event, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    /// Optional free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: user_id.into(),
            post_id: None,
            message: None,
        }
    }

    /// A `COMMENT_ADDED` event for `user_id` on `post_id`.
    pub fn comment_added(user_id: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self::new(COMMENT_ADDED, user_id).with_post(post_id)
    }

    pub fn with_post(mut self, post_id: impl Into<String>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Render the display string for this event.
    pub fn render_content(&self) -> String {
        let message = self.message.as_deref().filter(|m| !m.trim().is_empty());
        match (self.event_type.as_str(), message) {
            (COMMENT_ADDED, Some(message)) => format!(
                "User {} commented {} on Post {}",
                self.user_id,
                message,
                self.post_label()
            ),
            (COMMENT_ADDED, None) => format!(
                "User {} commented on Post {}",
                self.user_id,
                self.post_label()
            ),
            (_, Some(message)) => message.to_string(),
            (event_type, None) => format!("{} event for user {}", event_type, self.user_id),
        }
    }

    fn post_label(&self) -> &str {
        self.post_id.as_deref().unwrap_or("unknown")
    }
}

/// A fully assembled notification.
///
/// Serialized with the same field names as the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    /// Whether the reaper may delete this notification at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
