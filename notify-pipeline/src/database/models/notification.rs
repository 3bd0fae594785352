//! Notification database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::notification::Notification;
use crate::{Error, Result};

/// Row shape of the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    pub user_id: String,
    #[sqlx(rename = "type")]
    pub notification_type: String,
    pub content: String,
    pub is_read: bool,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC); NULL rows never expire.
    pub expires_at: Option<i64>,
}

impl From<&Notification> for NotificationDbModel {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.to_string(),
            user_id: n.user_id.clone(),
            notification_type: n.notification_type.clone(),
            content: n.content.clone(),
            is_read: n.is_read,
            created_at: datetime_to_ms(n.created_at),
            expires_at: Some(datetime_to_ms(n.expires_at)),
        }
    }
}

impl TryFrom<NotificationDbModel> for Notification {
    type Error = Error;

    fn try_from(row: NotificationDbModel) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| Error::Database(format!("invalid notification id {}: {}", row.id, e)))?;
        let created_at = ms_to_datetime(row.created_at);
        // Rows written outside this crate may lack an expiry; treat them as never expiring.
        let expires_at = row
            .expires_at
            .map(ms_to_datetime)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        Ok(Notification {
            id,
            user_id: row.user_id,
            notification_type: row.notification_type,
            content: row.content,
            is_read: row.is_read,
            created_at,
            expires_at,
        })
    }
}
