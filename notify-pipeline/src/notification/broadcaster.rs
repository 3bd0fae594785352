//! Fan-out of persisted notifications.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::channels::DeliveryChannel;
use super::model::Notification;
use super::publishers::Publisher;

/// What a single [`Broadcaster::fan_out`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub published: usize,
    pub failed: usize,
    /// Secondary channels a delivery task was spawned for.
    pub dispatched: usize,
}

/// Sends each persisted notification through every configured publisher and
/// secondary channel.
#[derive(Default)]
pub struct Broadcaster {
    publishers: Vec<Arc<dyn Publisher>>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
    channel_tasks: TaskTracker,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn publisher_names(&self) -> Vec<&'static str> {
        self.publishers.iter().map(|p| p.name()).collect()
    }

    /// Publish `notification` through all publishers concurrently, then hand
    /// it to each enabled secondary channel on its own task.
    ///
    /// Failures are logged per publisher or channel and never returned.
    pub async fn fan_out(&self, notification: &Notification) -> FanOutReport {
        let results = join_all(
            self.publishers
                .iter()
                .map(|p| async move { (p.name(), p.publish(notification).await) }),
        )
        .await;

        let mut report = FanOutReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(publisher = name, id = %notification.id, error = %e, "Publisher failed");
                }
            }
        }

        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            let channel = channel.clone();
            let notification = notification.clone();
            self.channel_tasks.spawn(async move {
                if let Err(e) = channel.send(&notification).await {
                    warn!(
                        channel = channel.channel_type(),
                        id = %notification.id,
                        error = %e,
                        "Secondary delivery failed"
                    );
                }
            });
            report.dispatched += 1;
        }

        info!(
            id = %notification.id,
            user_id = %notification.user_id,
            "[Notification]: {}",
            notification.content
        );
        report
    }

    /// Wait for every secondary channel send spawned so far.
    pub async fn wait_for_channels(&self) {
        self.channel_tasks.close();
        self.channel_tasks.wait().await;
        self.channel_tasks.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::publishers::MockPublisher;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn notification() -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            notification_type: "COMMENT_ADDED".to_string(),
            content: "User u1 commented on Post p1".to_string(),
            is_read: false,
            created_at: now,
            expires_at: now + Duration::days(7),
        }
    }

    struct RecordingChannel {
        enabled: bool,
        fail: bool,
        sent: Arc<Mutex<Vec<Uuid>>>,
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        fn channel_type(&self) -> &'static str {
            "recording"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().push(notification.id);
            if self.fail {
                return Err(Error::Other("channel down".to_string()));
            }
            Ok(())
        }
    }

    fn mock_publisher(name: &'static str, ok: bool, expected: Uuid) -> MockPublisher {
        let mut publisher = MockPublisher::new();
        publisher.expect_name().return_const(name);
        publisher
            .expect_publish()
            .withf(move |n| n.id == expected)
            .times(1)
            .returning(move |_| {
                if ok {
                    Ok(())
                } else {
                    Err(Error::publish(name, "unreachable"))
                }
            });
        publisher
    }

    #[tokio::test]
    async fn failing_publisher_does_not_affect_others() {
        let n = notification();
        let broadcaster = Broadcaster::new()
            .with_publisher(Arc::new(mock_publisher("down", false, n.id)))
            .with_publisher(Arc::new(mock_publisher("up", true, n.id)));

        let report = broadcaster.fan_out(&n).await;
        assert_eq!(
            report,
            FanOutReport {
                published: 1,
                failed: 1,
                dispatched: 0
            }
        );
    }

    #[tokio::test]
    async fn enabled_channels_receive_notification_even_when_failing() {
        let n = notification();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let broadcaster = Broadcaster::new()
            .with_channel(Arc::new(RecordingChannel {
                enabled: true,
                fail: true,
                sent: sent.clone(),
            }))
            .with_channel(Arc::new(RecordingChannel {
                enabled: true,
                fail: false,
                sent: sent.clone(),
            }))
            .with_channel(Arc::new(RecordingChannel {
                enabled: false,
                fail: false,
                sent: sent.clone(),
            }));

        let report = broadcaster.fan_out(&n).await;
        assert_eq!(report.dispatched, 2);

        tokio::time::timeout(StdDuration::from_secs(5), async {
            while sent.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*sent.lock(), vec![n.id, n.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_channels_covers_slow_sends() {
        struct SlowChannel(Arc<Mutex<Vec<Uuid>>>);

        #[async_trait]
        impl DeliveryChannel for SlowChannel {
            fn channel_type(&self) -> &'static str {
                "slow"
            }

            fn is_enabled(&self) -> bool {
                true
            }

            async fn send(&self, notification: &Notification) -> Result<()> {
                tokio::time::sleep(StdDuration::from_secs(30)).await;
                self.0.lock().push(notification.id);
                Ok(())
            }
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let broadcaster = Broadcaster::new().with_channel(Arc::new(SlowChannel(sent.clone())));
        let (a, b) = (notification(), notification());
        broadcaster.fan_out(&a).await;
        broadcaster.fan_out(&b).await;
        assert!(sent.lock().is_empty());

        broadcaster.wait_for_channels().await;
        assert_eq!(sent.lock().len(), 2);

        // Still usable afterwards.
        broadcaster.fan_out(&a).await;
        broadcaster.wait_for_channels().await;
        assert_eq!(sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn no_publishers_is_a_no_op() {
        let report = Broadcaster::new().fan_out(&notification()).await;
        assert_eq!(report, FanOutReport::default());
    }
}
