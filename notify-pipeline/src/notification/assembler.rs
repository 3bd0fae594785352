//! Turns events into notifications and stages them for the next bulk write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::batch::BatchBuffer;
use super::clock::{Clock, IdGenerator};
use super::model::{Event, Notification};

/// Default time-to-live of a notification, in seconds (7 days).
pub const DEFAULT_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub struct NotificationAssembler {
    ttl: chrono::Duration,
    batch_size: usize,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    buffer: Arc<BatchBuffer>,
}

impl NotificationAssembler {
    pub fn new(
        ttl: chrono::Duration,
        batch_size: usize,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        buffer: Arc<BatchBuffer>,
    ) -> Self {
        Self {
            ttl,
            batch_size,
            clock,
            ids,
            buffer,
        }
    }

    /// Build the notification for `event` with a fresh id, stamped now.
    ///
    /// An expiry past the representable range saturates instead of failing.
    pub fn assemble(&self, event: &Event) -> Notification {
        let created_at = self.clock.now();
        let expires_at = created_at
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Notification {
            id: self.ids.next_id(),
            user_id: event.user_id.clone(),
            notification_type: event.event_type.clone(),
            content: event.render_content(),
            is_read: false,
            created_at,
            expires_at,
        }
    }

    /// Assemble `event` into the buffer, requesting a flush whenever at least a
    /// full batch is waiting.
    pub fn accept(&self, event: Event) -> Notification {
        let notification = self.assemble(&event);
        let buffered = self.buffer.push(notification.clone());
        debug!(id = %notification.id, buffered, "Notification assembled");

        if buffered >= self.batch_size {
            self.buffer.request_flush();
        }
        notification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::clock::{ManualClock, UuidGenerator};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn assembler(batch_size: usize) -> (NotificationAssembler, Arc<ManualClock>, Arc<BatchBuffer>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let buffer = Arc::new(BatchBuffer::new());
        let assembler = NotificationAssembler::new(
            chrono::Duration::seconds(DEFAULT_TTL_SECS),
            batch_size,
            clock.clone(),
            Arc::new(UuidGenerator),
            buffer.clone(),
        );
        (assembler, clock, buffer)
    }

    #[test]
    fn assemble_stamps_time_and_expiry() {
        let (assembler, clock, _) = assembler(10);
        let n = assembler.assemble(&Event::comment_added("u1", "p1"));

        assert_eq!(n.user_id, "u1");
        assert_eq!(n.notification_type, "COMMENT_ADDED");
        assert_eq!(n.content, "User u1 commented on Post p1");
        assert!(!n.is_read);
        assert_eq!(n.created_at, clock.now());
        assert_eq!(n.expires_at, n.created_at + chrono::Duration::days(7));
    }

    #[test]
    fn oversized_ttl_saturates_expiry() {
        let buffer = Arc::new(BatchBuffer::new());
        let assembler = NotificationAssembler::new(
            chrono::Duration::MAX,
            10,
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())),
            Arc::new(UuidGenerator),
            buffer.clone(),
        );

        let n = assembler.accept(Event::comment_added("u1", "p1"));
        assert_eq!(n.expires_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn ids_are_unique() {
        let (assembler, _, _) = assembler(10);
        let event = Event::comment_added("u1", "p1");
        let ids: HashSet<_> = (0..1000).map(|_| assembler.assemble(&event).id).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn completing_a_batch_requests_a_flush() {
        let (assembler, _, buffer) = assembler(3);
        for _ in 0..3 {
            assembler.accept(Event::comment_added("u1", "p1"));
        }
        assert_eq!(buffer.len(), 3);

        // The stored permit resolves the next wait immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), buffer.flush_requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn appends_past_a_full_batch_keep_requesting_flushes() {
        let (assembler, _, buffer) = assembler(3);
        for _ in 0..5 {
            assembler.accept(Event::comment_added("u1", "p1"));
        }
        // Consume the permit left by the first full batch.
        buffer.flush_requested().await;

        assembler.accept(Event::comment_added("u1", "p1"));
        tokio::time::timeout(std::time::Duration::from_secs(1), buffer.flush_requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn partial_batch_does_not_request_a_flush() {
        let (assembler, _, buffer) = assembler(3);
        assembler.accept(Event::comment_added("u1", "p1"));
        assembler.accept(Event::comment_added("u1", "p1"));

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), buffer.flush_requested())
                .await;
        assert!(waited.is_err());
    }
}
